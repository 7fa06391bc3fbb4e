use crate::bus::Bus;
use crate::cpu6502::{CPU, StatusFlag};

impl<B: Bus> CPU<B> {
    pub(crate) fn handle_ora(&mut self) -> u8 {
        let value = self.fetch_operand();
        self.accumulator |= value;

        // Set Zero flag (Z) - set if result = 0
        self.set_status_flag(StatusFlag::Zero, self.accumulator == 0);

        // Set Negative flag (N) - set if bit 7 of result is set
        self.set_status_flag(StatusFlag::Negative, (self.accumulator & 0x80) != 0);

        0
    }
}
