use crate::bus::Bus;
use crate::cpu6502::{CPU, StatusFlag};

impl<B: Bus> CPU<B> {
    pub(crate) fn handle_cli(&mut self) -> u8 {
        self.set_status_flag(StatusFlag::InterruptDisable, false);
        0
    }
}
