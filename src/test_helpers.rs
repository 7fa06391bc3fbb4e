use crate::bus::RamBus;
use crate::cpu6502::CPU;

/// CPU over flat RAM with the RESET vector pointing at 0x8000.
pub(crate) fn test_cpu() -> CPU<RamBus> {
    let mut bus = RamBus::new();
    bus.memory[0xFFFC] = 0x00;
    bus.memory[0xFFFD] = 0x80;
    CPU::new(bus)
}

pub(crate) fn load_program(cpu: &mut CPU<RamBus>, program: &[u8], addr: u16) {
    for (i, byte) in program.iter().enumerate() {
        cpu.write_u8(addr.wrapping_add(i as u16), *byte);
    }
}

/// Ticks the core until the next fetch would be a BRK, then consumes the
/// BRK opcode byte and stops. Scenario programs end on a BRK slot; stopping
/// before the interrupt sequence keeps the register file inspectable.
pub(crate) fn run_until_brk(cpu: &mut CPU<RamBus>) {
    loop {
        if cpu.cycles_remaining == 0 {
            let pc = cpu.program_counter;
            if cpu.read_u8(pc) == 0x00 {
                cpu.program_counter = pc.wrapping_add(1);
                return;
            }
        }
        cpu.tick();
    }
}
