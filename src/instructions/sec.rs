use crate::bus::Bus;
use crate::cpu6502::{CPU, StatusFlag};

impl<B: Bus> CPU<B> {
    pub(crate) fn handle_sec(&mut self) -> u8 {
        self.set_status_flag(StatusFlag::Carry, true);
        0
    }
}
