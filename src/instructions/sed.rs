use crate::bus::Bus;
use crate::cpu6502::{CPU, StatusFlag};

impl<B: Bus> CPU<B> {
    pub(crate) fn handle_sed(&mut self) -> u8 {
        // The flag is storable, but on this 6502 variant arithmetic ignores it.
        self.set_status_flag(StatusFlag::DecimalMode, true);
        0
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu6502::StatusFlag;
    use crate::test_helpers::test_cpu;

    #[test]
    fn test_sed_sets_only_the_decimal_flag() {
        let mut cpu = test_cpu();
        cpu.status_register = 0x00;
        cpu.handle_sed();
        assert_eq!(cpu.get_status_flag(StatusFlag::DecimalMode), true);
        assert_eq!(cpu.status_register, 0x08);
    }
}
