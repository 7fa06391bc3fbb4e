mod bus;
mod cpu6502;
mod instructions;
mod rom;
#[cfg(test)]
mod test_helpers;

use crate::bus::SystemBus;
use crate::cpu6502::{CPU, trace};
use crate::rom::Rom;

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./nestest.nes".to_string());
    let rom_data = std::fs::read(&path).expect("Failed to read ROM file");
    let rom = Rom::parse_nes_rom(rom_data).expect("Failed to parse ROM");
    rom.check_validity().expect("ROM validity check failed");

    let bus = SystemBus::new(rom);
    let mut cpu = CPU::new(bus);
    cpu.run_with_callback(move |cpu| {
        println!("{}", trace(cpu));
    });

    if let Some(fault) = cpu.fault() {
        println!("halted: {}", fault);
    }
}
