use std::sync::atomic::{AtomicU8, Ordering};

/// Install state of one peer permission.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PermState {
    Idle = 0,
    Permitted = 1,
}

impl From<u8> for PermState {
    fn from(v: u8) -> Self {
        match v {
            1 => PermState::Permitted,
            _ => PermState::Idle,
        }
    }
}

#[derive(Default)]
pub struct Permission {
    st: AtomicU8,
}

impl Permission {
    pub fn set_state(&self, state: PermState) {
        self.st.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> PermState {
        self.st.load(Ordering::SeqCst).into()
    }
}
