use crate::bitset::ByteBitset;
use crate::query::{ByteCursor, VariableConstraint, VariableId, VariableSet};
use crate::trible::{
    AEVSegmentation, AVESegmentation, EAVSegmentation, EVASegmentation, VAESegmentation,
    VEASegmentation, TRIBLE_LEN,
};
use crate::trie::PaddedCursor;

use super::TribleSet;

/// The exploration state: which of the three variables have been bound,
/// in which order. It determines which of the six indices answers byte
/// level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stack {
    Empty,
    E,
    A,
    V,
    EA,
    EV,
    AE,
    AV,
    VE,
    VA,
    EAV,
    EVA,
    AEV,
    AVE,
    VEA,
    VAE,
}

/// A constraint over three variables backed by the six permutation
/// indices of a [`TribleSet`].
///
/// While a single variable is being bound, the two indices starting
/// with its field are walked in lockstep, so that whichever of them a
/// later state needs is already positioned. Once two variables are
/// bound the index matching their order is the single authority.
pub struct TribleConstraint {
    state: Stack,
    e_var: VariableId,
    a_var: VariableId,
    v_var: VariableId,
    eav_cursor: PaddedCursor<TRIBLE_LEN, (), EAVSegmentation>,
    eva_cursor: PaddedCursor<TRIBLE_LEN, (), EVASegmentation>,
    aev_cursor: PaddedCursor<TRIBLE_LEN, (), AEVSegmentation>,
    ave_cursor: PaddedCursor<TRIBLE_LEN, (), AVESegmentation>,
    vea_cursor: PaddedCursor<TRIBLE_LEN, (), VEASegmentation>,
    vae_cursor: PaddedCursor<TRIBLE_LEN, (), VAESegmentation>,
}

impl TribleConstraint {
    pub(super) fn new(set: &TribleSet, e: VariableId, a: VariableId, v: VariableId) -> Self {
        if e == a || e == v || a == v {
            panic!(
                "trible variables must be unique; use explicit equality constraints instead"
            );
        }

        TribleConstraint {
            state: Stack::Empty,
            e_var: e,
            a_var: a,
            v_var: v,
            eav_cursor: set.eav.padded_cursor(),
            eva_cursor: set.eva.padded_cursor(),
            aev_cursor: set.aev.padded_cursor(),
            ave_cursor: set.ave.padded_cursor(),
            vea_cursor: set.vea.padded_cursor(),
            vae_cursor: set.vae.padded_cursor(),
        }
    }
}

impl ByteCursor for TribleConstraint {
    fn peek(&self) -> Option<u8> {
        match self.state {
            Stack::E | Stack::EA | Stack::EAV => self.eav_cursor.peek(),
            Stack::EV | Stack::EVA => self.eva_cursor.peek(),
            Stack::A | Stack::AE | Stack::AEV => self.aev_cursor.peek(),
            Stack::AV | Stack::AVE => self.ave_cursor.peek(),
            Stack::V | Stack::VE | Stack::VEA => self.vea_cursor.peek(),
            Stack::VA | Stack::VAE => self.vae_cursor.peek(),
            Stack::Empty => panic!("`peek` called with no variable explored"),
        }
    }

    fn propose(&self, result_set: &mut ByteBitset) {
        match self.state {
            Stack::E | Stack::EA | Stack::EAV => self.eav_cursor.propose(result_set),
            Stack::EV | Stack::EVA => self.eva_cursor.propose(result_set),
            Stack::A | Stack::AE | Stack::AEV => self.aev_cursor.propose(result_set),
            Stack::AV | Stack::AVE => self.ave_cursor.propose(result_set),
            Stack::V | Stack::VE | Stack::VEA => self.vea_cursor.propose(result_set),
            Stack::VA | Stack::VAE => self.vae_cursor.propose(result_set),
            Stack::Empty => panic!("`propose` called with no variable explored"),
        }
    }

    fn push(&mut self, byte: u8) {
        // With one variable bound, both indices starting with its field
        // advance together so either is positioned for the next state.
        match self.state {
            Stack::E => {
                self.eav_cursor.push(byte);
                self.eva_cursor.push(byte);
            }
            Stack::A => {
                self.aev_cursor.push(byte);
                self.ave_cursor.push(byte);
            }
            Stack::V => {
                self.vea_cursor.push(byte);
                self.vae_cursor.push(byte);
            }
            Stack::EA | Stack::EAV => self.eav_cursor.push(byte),
            Stack::EV | Stack::EVA => self.eva_cursor.push(byte),
            Stack::AE | Stack::AEV => self.aev_cursor.push(byte),
            Stack::AV | Stack::AVE => self.ave_cursor.push(byte),
            Stack::VE | Stack::VEA => self.vea_cursor.push(byte),
            Stack::VA | Stack::VAE => self.vae_cursor.push(byte),
            Stack::Empty => panic!("`push` called with no variable explored"),
        }
    }

    fn pop(&mut self) {
        match self.state {
            Stack::E => {
                self.eav_cursor.pop();
                self.eva_cursor.pop();
            }
            Stack::A => {
                self.aev_cursor.pop();
                self.ave_cursor.pop();
            }
            Stack::V => {
                self.vea_cursor.pop();
                self.vae_cursor.pop();
            }
            Stack::EA | Stack::EAV => self.eav_cursor.pop(),
            Stack::EV | Stack::EVA => self.eva_cursor.pop(),
            Stack::AE | Stack::AEV => self.aev_cursor.pop(),
            Stack::AV | Stack::AVE => self.ave_cursor.pop(),
            Stack::VE | Stack::VEA => self.vea_cursor.pop(),
            Stack::VA | Stack::VAE => self.vae_cursor.pop(),
            Stack::Empty => panic!("`pop` called with no variable explored"),
        }
    }

    fn segment_count(&self) -> u32 {
        match self.state {
            Stack::E | Stack::EA | Stack::EAV => self.eav_cursor.segment_count(),
            Stack::EV | Stack::EVA => self.eva_cursor.segment_count(),
            Stack::A | Stack::AE | Stack::AEV => self.aev_cursor.segment_count(),
            Stack::AV | Stack::AVE => self.ave_cursor.segment_count(),
            Stack::V | Stack::VE | Stack::VEA => self.vea_cursor.segment_count(),
            Stack::VA | Stack::VAE => self.vae_cursor.segment_count(),
            Stack::Empty => panic!("`segment_count` called with no variable explored"),
        }
    }
}

impl VariableConstraint for TribleConstraint {
    fn variables(&self, result_set: &mut VariableSet) {
        result_set.unset_all();
        result_set.set(self.e_var);
        result_set.set(self.a_var);
        result_set.set(self.v_var);
    }

    fn estimate(&self, variable: VariableId) -> u32 {
        match self.state {
            Stack::Empty if variable == self.e_var => self.eav_cursor.segment_count(),
            Stack::Empty if variable == self.a_var => self.aev_cursor.segment_count(),
            Stack::Empty if variable == self.v_var => self.vea_cursor.segment_count(),
            Stack::E if variable == self.a_var => self.eav_cursor.segment_count(),
            Stack::E if variable == self.v_var => self.eva_cursor.segment_count(),
            Stack::A if variable == self.e_var => self.aev_cursor.segment_count(),
            Stack::A if variable == self.v_var => self.ave_cursor.segment_count(),
            Stack::V if variable == self.e_var => self.vea_cursor.segment_count(),
            Stack::V if variable == self.a_var => self.vae_cursor.segment_count(),
            Stack::EA if variable == self.v_var => self.eav_cursor.segment_count(),
            Stack::EV if variable == self.a_var => self.eva_cursor.segment_count(),
            Stack::AE if variable == self.v_var => self.aev_cursor.segment_count(),
            Stack::AV if variable == self.e_var => self.ave_cursor.segment_count(),
            Stack::VE if variable == self.a_var => self.vea_cursor.segment_count(),
            Stack::VA if variable == self.e_var => self.vae_cursor.segment_count(),
            _ => panic!("variable is not explorable from this state"),
        }
    }

    fn sample(&self, variable: VariableId) -> u32 {
        match self.state {
            Stack::Empty if variable == self.e_var => self.eav_cursor.sample(),
            Stack::Empty if variable == self.a_var => self.aev_cursor.sample(),
            Stack::Empty if variable == self.v_var => self.vea_cursor.sample(),
            Stack::E if variable == self.a_var => self.eav_cursor.sample(),
            Stack::E if variable == self.v_var => self.eva_cursor.sample(),
            Stack::A if variable == self.e_var => self.aev_cursor.sample(),
            Stack::A if variable == self.v_var => self.ave_cursor.sample(),
            Stack::V if variable == self.e_var => self.vea_cursor.sample(),
            Stack::V if variable == self.a_var => self.vae_cursor.sample(),
            Stack::EA if variable == self.v_var => self.eav_cursor.sample(),
            Stack::EV if variable == self.a_var => self.eva_cursor.sample(),
            Stack::AE if variable == self.v_var => self.aev_cursor.sample(),
            Stack::AV if variable == self.e_var => self.ave_cursor.sample(),
            Stack::VE if variable == self.a_var => self.vea_cursor.sample(),
            Stack::VA if variable == self.e_var => self.vae_cursor.sample(),
            _ => panic!("variable is not explorable from this state"),
        }
    }

    fn explore(&mut self, variable: VariableId) {
        self.state = match self.state {
            Stack::Empty if variable == self.e_var => Stack::E,
            Stack::Empty if variable == self.a_var => Stack::A,
            Stack::Empty if variable == self.v_var => Stack::V,
            Stack::E if variable == self.a_var => Stack::EA,
            Stack::E if variable == self.v_var => Stack::EV,
            Stack::A if variable == self.e_var => Stack::AE,
            Stack::A if variable == self.v_var => Stack::AV,
            Stack::V if variable == self.e_var => Stack::VE,
            Stack::V if variable == self.a_var => Stack::VA,
            Stack::EA if variable == self.v_var => Stack::EAV,
            Stack::EV if variable == self.a_var => Stack::EVA,
            Stack::AE if variable == self.v_var => Stack::AEV,
            Stack::AV if variable == self.e_var => Stack::AVE,
            Stack::VE if variable == self.a_var => Stack::VEA,
            Stack::VA if variable == self.e_var => Stack::VAE,
            _ => panic!("variable is not explorable from this state"),
        };
    }

    fn retreat(&mut self) {
        self.state = match self.state {
            Stack::E | Stack::A | Stack::V => Stack::Empty,
            Stack::EA | Stack::EV => Stack::E,
            Stack::AE | Stack::AV => Stack::A,
            Stack::VE | Stack::VA => Stack::V,
            Stack::EAV => Stack::EA,
            Stack::EVA => Stack::EV,
            Stack::AEV => Stack::AE,
            Stack::AVE => Stack::AV,
            Stack::VEA => Stack::VE,
            Stack::VAE => Stack::VA,
            Stack::Empty => panic!("`retreat` called with no variable explored"),
        };
    }
}
