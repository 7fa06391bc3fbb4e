use crate::bus::Bus;
use crate::cpu6502::{CPU, StatusFlag};

impl<B: Bus> CPU<B> {
    pub(crate) fn handle_bpl(&mut self) -> u8 {
        self.branch(!self.get_status_flag(StatusFlag::Negative))
    }
}
