use std::fmt;

use once_cell::sync::Lazy;
use phf::phf_map;

use crate::bus::Bus;

#[derive(Debug)]
pub struct CPU<B: Bus> {
    // More info about the 6502 registers can be found here:
    // https://www.nesdev.org/obelisk-6502-guide/registers.html

    // The program counter is a 16 bit register that holds the memory address of the next
    // byte of the current instruction; it advances as the instruction's bytes are consumed.
    pub program_counter: u16,

    // The stack pointer is an 8 bit register and holds the low 8 bits of the next free location
    // on the stack. The location of the stack is fixed and cannot be moved.
    // Memory space [0x0100 .. 0x1FF]
    pub stack_pointer: u8,

    // The accumulator is an 8 bit register used for arithmetic and logical operations.
    pub accumulator: u8,

    // The 8 bit index register is most commonly used to hold counters or offsets for accessing memory.
    pub x_register: u8,

    // The Y register is similar to the X register in that it is available for holding counter or offsets memory access
    pub y_register: u8,

    // As instructions are executed a set of processor flags are set or clear to record the results of the operation.
    // Each bit in the status register represents a different flag:
    // Bit 7: Negative Flag (N)
    // Bit 6: Overflow Flag (V)
    // Bit 5: Unused (U) (always set to 1)
    // Bit 4: Break Command (B)
    // Bit 3: Decimal Mode Flag (D)
    // Bit 2: Interrupt Disable (I)
    // Bit 1: Zero Flag (Z)
    // Bit 0: Carry Flag (C)
    pub status_register: u8,

    // Ticks still owed by the instruction currently in flight. Zero exactly at
    // instruction boundaries, which is when interrupts are polled.
    pub cycles_remaining: u8,

    // Ticks since the last RESET.
    pub total_cycles: u64,

    // Latches filled by the addressing resolver for the instruction in flight.
    pub(crate) opcode: u8,
    pub(crate) mode: AddressingMode,
    pub(crate) effective_addr: u16,
    pub(crate) operand: u8,
    pub(crate) rel_offset: i8,
    pub(crate) page_cross: bool,

    // Interrupt lines. NMI is an edge latch cleared when taken; IRQ stays
    // pending while masked by the I flag.
    nmi_pending: bool,
    irq_pending: bool,

    pub(crate) halted: bool,
    fault: Option<IllegalOpcode>,
    illegal_policy: IllegalOpcodePolicy,

    bus: B,
}

// Each flag corresponds to a bit in the status register
// Values are the bit positions
#[derive(Debug, Clone, Copy)]
pub enum StatusFlag {
    Carry = 0,
    Zero = 1,
    InterruptDisable = 2,
    DecimalMode = 3,
    BreakCommand = 4,
    Unused = 5,
    Overflow = 6,
    Negative = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Absolute,    // e.g. LDA $1234
    AbsoluteX,   // e.g. LDA $1234,X
    AbsoluteY,   // e.g. LDA $1234,Y
    Accumulator, // e.g. ASL A
    Immediate,   // e.g. LDA #$10
    Implicit,    // e.g. CLC, INX (no operand)
    Indirect,    // e.g. JMP ($1234)
    IndirectX,   // e.g. LDA ($10,X)
    IndirectY,   // e.g. LDA ($10),Y
    Relative,    // e.g. BEQ +5
    ZeroPage,    // e.g. LDA $10
    ZeroPageX,   // e.g. LDA $10,X
    ZeroPageY,   // e.g. LDX $10,Y
}

// Operation selector for the dispatch table. Keeping the table as pure data
// and matching on the selector in one place lets the table stay constant
// while the CPU is generic over its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
}

/// What to do when the fetched opcode has no entry in the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalOpcodePolicy {
    // Skip the slot as a NOP of its documented length. Test ROMs expect this.
    NopSkip,
    // Stop the core and record the offending opcode and address.
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalOpcode {
    pub opcode: u8,
    pub pc: u16,
}

impl fmt::Display for IllegalOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal opcode {:02X} at {:04X}", self.opcode, self.pc)
    }
}

/// Observable core state at an instruction boundary, for tracing and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub program_counter: u16,
    pub stack_pointer: u8,
    pub accumulator: u8,
    pub x_register: u8,
    pub y_register: u8,
    pub status_register: u8,
    pub total_cycles: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Operand {
    pub opcode: u8,
    pub name: &'static str,
    pub operation: Operation,
    pub addressing_mode: AddressingMode,
    pub bytes: u8,
    pub cycles: u8,
    // Read-style ABX/ABY/IDY instructions pay one extra cycle when indexing
    // crosses a page; write-style ones bake the dummy read into their base.
    pub page_penalty: bool,
}

// List of all 151 documented opcodes and their corresponding Operand definitions.
static OPERAND_MAP: phf::Map<u8, Operand> = phf_map! {
    // ADC Instructions
    0x69u8 => Operand { opcode: 0x69, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0x65u8 => Operand { opcode: 0x65, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x75u8 => Operand { opcode: 0x75, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x6Du8 => Operand { opcode: 0x6D, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0x7Du8 => Operand { opcode: 0x7D, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0x79u8 => Operand { opcode: 0x79, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0x61u8 => Operand { opcode: 0x61, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0x71u8 => Operand { opcode: 0x71, name: "ADC", operation: Operation::Adc, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // AND Instructions
    0x29u8 => Operand { opcode: 0x29, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0x25u8 => Operand { opcode: 0x25, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x35u8 => Operand { opcode: 0x35, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x2Du8 => Operand { opcode: 0x2D, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0x3Du8 => Operand { opcode: 0x3D, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0x39u8 => Operand { opcode: 0x39, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0x21u8 => Operand { opcode: 0x21, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0x31u8 => Operand { opcode: 0x31, name: "AND", operation: Operation::And, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // ASL Instructions
    0x0Au8 => Operand { opcode: 0x0A, name: "ASL", operation: Operation::Asl, addressing_mode: AddressingMode::Accumulator, bytes: 1, cycles: 2, page_penalty: false },
    0x06u8 => Operand { opcode: 0x06, name: "ASL", operation: Operation::Asl, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0x16u8 => Operand { opcode: 0x16, name: "ASL", operation: Operation::Asl, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0x0Eu8 => Operand { opcode: 0x0E, name: "ASL", operation: Operation::Asl, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0x1Eu8 => Operand { opcode: 0x1E, name: "ASL", operation: Operation::Asl, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // Branch Instructions
    0x90u8 => Operand { opcode: 0x90, name: "BCC", operation: Operation::Bcc, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0xB0u8 => Operand { opcode: 0xB0, name: "BCS", operation: Operation::Bcs, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0xF0u8 => Operand { opcode: 0xF0, name: "BEQ", operation: Operation::Beq, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0x30u8 => Operand { opcode: 0x30, name: "BMI", operation: Operation::Bmi, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0xD0u8 => Operand { opcode: 0xD0, name: "BNE", operation: Operation::Bne, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0x10u8 => Operand { opcode: 0x10, name: "BPL", operation: Operation::Bpl, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0x50u8 => Operand { opcode: 0x50, name: "BVC", operation: Operation::Bvc, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },
    0x70u8 => Operand { opcode: 0x70, name: "BVS", operation: Operation::Bvs, addressing_mode: AddressingMode::Relative, bytes: 2, cycles: 2, page_penalty: false },

    // BIT Instructions
    0x24u8 => Operand { opcode: 0x24, name: "BIT", operation: Operation::Bit, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x2Cu8 => Operand { opcode: 0x2C, name: "BIT", operation: Operation::Bit, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },

    // BRK Instructions
    0x00u8 => Operand { opcode: 0x00, name: "BRK", operation: Operation::Brk, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 7, page_penalty: false },

    // Flag Clear Instructions
    0x18u8 => Operand { opcode: 0x18, name: "CLC", operation: Operation::Clc, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xD8u8 => Operand { opcode: 0xD8, name: "CLD", operation: Operation::Cld, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x58u8 => Operand { opcode: 0x58, name: "CLI", operation: Operation::Cli, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xB8u8 => Operand { opcode: 0xB8, name: "CLV", operation: Operation::Clv, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },

    // CMP Instructions
    0xC9u8 => Operand { opcode: 0xC9, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xC5u8 => Operand { opcode: 0xC5, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xD5u8 => Operand { opcode: 0xD5, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0xCDu8 => Operand { opcode: 0xCD, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0xDDu8 => Operand { opcode: 0xDD, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0xD9u8 => Operand { opcode: 0xD9, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0xC1u8 => Operand { opcode: 0xC1, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0xD1u8 => Operand { opcode: 0xD1, name: "CMP", operation: Operation::Cmp, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // CPX Instructions
    0xE0u8 => Operand { opcode: 0xE0, name: "CPX", operation: Operation::Cpx, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xE4u8 => Operand { opcode: 0xE4, name: "CPX", operation: Operation::Cpx, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xECu8 => Operand { opcode: 0xEC, name: "CPX", operation: Operation::Cpx, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },

    // CPY Instructions
    0xC0u8 => Operand { opcode: 0xC0, name: "CPY", operation: Operation::Cpy, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xC4u8 => Operand { opcode: 0xC4, name: "CPY", operation: Operation::Cpy, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xCCu8 => Operand { opcode: 0xCC, name: "CPY", operation: Operation::Cpy, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },

    // DEC Instructions
    0xC6u8 => Operand { opcode: 0xC6, name: "DEC", operation: Operation::Dec, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0xD6u8 => Operand { opcode: 0xD6, name: "DEC", operation: Operation::Dec, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0xCEu8 => Operand { opcode: 0xCE, name: "DEC", operation: Operation::Dec, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0xDEu8 => Operand { opcode: 0xDE, name: "DEC", operation: Operation::Dec, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // DEX / DEY Instructions
    0xCAu8 => Operand { opcode: 0xCA, name: "DEX", operation: Operation::Dex, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x88u8 => Operand { opcode: 0x88, name: "DEY", operation: Operation::Dey, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },

    // EOR Instructions
    0x49u8 => Operand { opcode: 0x49, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0x45u8 => Operand { opcode: 0x45, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x55u8 => Operand { opcode: 0x55, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x4Du8 => Operand { opcode: 0x4D, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0x5Du8 => Operand { opcode: 0x5D, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0x59u8 => Operand { opcode: 0x59, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0x41u8 => Operand { opcode: 0x41, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0x51u8 => Operand { opcode: 0x51, name: "EOR", operation: Operation::Eor, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // INC Instructions
    0xE6u8 => Operand { opcode: 0xE6, name: "INC", operation: Operation::Inc, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0xF6u8 => Operand { opcode: 0xF6, name: "INC", operation: Operation::Inc, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0xEEu8 => Operand { opcode: 0xEE, name: "INC", operation: Operation::Inc, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0xFEu8 => Operand { opcode: 0xFE, name: "INC", operation: Operation::Inc, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // INX / INY Instructions
    0xE8u8 => Operand { opcode: 0xE8, name: "INX", operation: Operation::Inx, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xC8u8 => Operand { opcode: 0xC8, name: "INY", operation: Operation::Iny, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },

    // JMP Instructions
    0x4Cu8 => Operand { opcode: 0x4C, name: "JMP", operation: Operation::Jmp, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 3, page_penalty: false },
    0x6Cu8 => Operand { opcode: 0x6C, name: "JMP", operation: Operation::Jmp, addressing_mode: AddressingMode::Indirect, bytes: 3, cycles: 5, page_penalty: false },

    // JSR Instructions
    0x20u8 => Operand { opcode: 0x20, name: "JSR", operation: Operation::Jsr, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },

    // LDA Instructions
    0xA9u8 => Operand { opcode: 0xA9, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xA5u8 => Operand { opcode: 0xA5, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xB5u8 => Operand { opcode: 0xB5, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0xADu8 => Operand { opcode: 0xAD, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0xBDu8 => Operand { opcode: 0xBD, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0xB9u8 => Operand { opcode: 0xB9, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0xA1u8 => Operand { opcode: 0xA1, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0xB1u8 => Operand { opcode: 0xB1, name: "LDA", operation: Operation::Lda, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // LDX Instructions
    0xA2u8 => Operand { opcode: 0xA2, name: "LDX", operation: Operation::Ldx, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xA6u8 => Operand { opcode: 0xA6, name: "LDX", operation: Operation::Ldx, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xB6u8 => Operand { opcode: 0xB6, name: "LDX", operation: Operation::Ldx, addressing_mode: AddressingMode::ZeroPageY, bytes: 2, cycles: 4, page_penalty: false },
    0xAEu8 => Operand { opcode: 0xAE, name: "LDX", operation: Operation::Ldx, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0xBEu8 => Operand { opcode: 0xBE, name: "LDX", operation: Operation::Ldx, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },

    // LDY Instructions
    0xA0u8 => Operand { opcode: 0xA0, name: "LDY", operation: Operation::Ldy, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xA4u8 => Operand { opcode: 0xA4, name: "LDY", operation: Operation::Ldy, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xB4u8 => Operand { opcode: 0xB4, name: "LDY", operation: Operation::Ldy, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0xACu8 => Operand { opcode: 0xAC, name: "LDY", operation: Operation::Ldy, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0xBCu8 => Operand { opcode: 0xBC, name: "LDY", operation: Operation::Ldy, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },

    // LSR Instructions
    0x4Au8 => Operand { opcode: 0x4A, name: "LSR", operation: Operation::Lsr, addressing_mode: AddressingMode::Accumulator, bytes: 1, cycles: 2, page_penalty: false },
    0x46u8 => Operand { opcode: 0x46, name: "LSR", operation: Operation::Lsr, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0x56u8 => Operand { opcode: 0x56, name: "LSR", operation: Operation::Lsr, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0x4Eu8 => Operand { opcode: 0x4E, name: "LSR", operation: Operation::Lsr, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0x5Eu8 => Operand { opcode: 0x5E, name: "LSR", operation: Operation::Lsr, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // NOP Instructions
    0xEAu8 => Operand { opcode: 0xEA, name: "NOP", operation: Operation::Nop, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },

    // ORA Instructions
    0x09u8 => Operand { opcode: 0x09, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0x05u8 => Operand { opcode: 0x05, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x15u8 => Operand { opcode: 0x15, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x0Du8 => Operand { opcode: 0x0D, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0x1Du8 => Operand { opcode: 0x1D, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0x19u8 => Operand { opcode: 0x19, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0x01u8 => Operand { opcode: 0x01, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0x11u8 => Operand { opcode: 0x11, name: "ORA", operation: Operation::Ora, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // Stack Instructions
    0x48u8 => Operand { opcode: 0x48, name: "PHA", operation: Operation::Pha, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 3, page_penalty: false },
    0x08u8 => Operand { opcode: 0x08, name: "PHP", operation: Operation::Php, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 3, page_penalty: false },
    0x68u8 => Operand { opcode: 0x68, name: "PLA", operation: Operation::Pla, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 4, page_penalty: false },
    0x28u8 => Operand { opcode: 0x28, name: "PLP", operation: Operation::Plp, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 4, page_penalty: false },

    // ROL Instructions
    0x2Au8 => Operand { opcode: 0x2A, name: "ROL", operation: Operation::Rol, addressing_mode: AddressingMode::Accumulator, bytes: 1, cycles: 2, page_penalty: false },
    0x26u8 => Operand { opcode: 0x26, name: "ROL", operation: Operation::Rol, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0x36u8 => Operand { opcode: 0x36, name: "ROL", operation: Operation::Rol, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0x2Eu8 => Operand { opcode: 0x2E, name: "ROL", operation: Operation::Rol, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0x3Eu8 => Operand { opcode: 0x3E, name: "ROL", operation: Operation::Rol, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // ROR Instructions
    0x6Au8 => Operand { opcode: 0x6A, name: "ROR", operation: Operation::Ror, addressing_mode: AddressingMode::Accumulator, bytes: 1, cycles: 2, page_penalty: false },
    0x66u8 => Operand { opcode: 0x66, name: "ROR", operation: Operation::Ror, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 5, page_penalty: false },
    0x76u8 => Operand { opcode: 0x76, name: "ROR", operation: Operation::Ror, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 6, page_penalty: false },
    0x6Eu8 => Operand { opcode: 0x6E, name: "ROR", operation: Operation::Ror, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 6, page_penalty: false },
    0x7Eu8 => Operand { opcode: 0x7E, name: "ROR", operation: Operation::Ror, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 7, page_penalty: false },

    // RTI / RTS Instructions
    0x40u8 => Operand { opcode: 0x40, name: "RTI", operation: Operation::Rti, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 6, page_penalty: false },
    0x60u8 => Operand { opcode: 0x60, name: "RTS", operation: Operation::Rts, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 6, page_penalty: false },

    // SBC Instructions
    0xE9u8 => Operand { opcode: 0xE9, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::Immediate, bytes: 2, cycles: 2, page_penalty: false },
    0xE5u8 => Operand { opcode: 0xE5, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0xF5u8 => Operand { opcode: 0xF5, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0xEDu8 => Operand { opcode: 0xED, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0xFDu8 => Operand { opcode: 0xFD, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 4, page_penalty: true },
    0xF9u8 => Operand { opcode: 0xF9, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 4, page_penalty: true },
    0xE1u8 => Operand { opcode: 0xE1, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0xF1u8 => Operand { opcode: 0xF1, name: "SBC", operation: Operation::Sbc, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 5, page_penalty: true },

    // Flag Set Instructions
    0x38u8 => Operand { opcode: 0x38, name: "SEC", operation: Operation::Sec, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xF8u8 => Operand { opcode: 0xF8, name: "SED", operation: Operation::Sed, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x78u8 => Operand { opcode: 0x78, name: "SEI", operation: Operation::Sei, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },

    // STA Instructions
    0x85u8 => Operand { opcode: 0x85, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x95u8 => Operand { opcode: 0x95, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x8Du8 => Operand { opcode: 0x8D, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },
    0x9Du8 => Operand { opcode: 0x9D, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::AbsoluteX, bytes: 3, cycles: 5, page_penalty: false },
    0x99u8 => Operand { opcode: 0x99, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::AbsoluteY, bytes: 3, cycles: 5, page_penalty: false },
    0x81u8 => Operand { opcode: 0x81, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::IndirectX, bytes: 2, cycles: 6, page_penalty: false },
    0x91u8 => Operand { opcode: 0x91, name: "STA", operation: Operation::Sta, addressing_mode: AddressingMode::IndirectY, bytes: 2, cycles: 6, page_penalty: false },

    // STX Instructions
    0x86u8 => Operand { opcode: 0x86, name: "STX", operation: Operation::Stx, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x96u8 => Operand { opcode: 0x96, name: "STX", operation: Operation::Stx, addressing_mode: AddressingMode::ZeroPageY, bytes: 2, cycles: 4, page_penalty: false },
    0x8Eu8 => Operand { opcode: 0x8E, name: "STX", operation: Operation::Stx, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },

    // STY Instructions
    0x84u8 => Operand { opcode: 0x84, name: "STY", operation: Operation::Sty, addressing_mode: AddressingMode::ZeroPage, bytes: 2, cycles: 3, page_penalty: false },
    0x94u8 => Operand { opcode: 0x94, name: "STY", operation: Operation::Sty, addressing_mode: AddressingMode::ZeroPageX, bytes: 2, cycles: 4, page_penalty: false },
    0x8Cu8 => Operand { opcode: 0x8C, name: "STY", operation: Operation::Sty, addressing_mode: AddressingMode::Absolute, bytes: 3, cycles: 4, page_penalty: false },

    // Transfer Instructions
    0xAAu8 => Operand { opcode: 0xAA, name: "TAX", operation: Operation::Tax, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xA8u8 => Operand { opcode: 0xA8, name: "TAY", operation: Operation::Tay, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0xBAu8 => Operand { opcode: 0xBA, name: "TSX", operation: Operation::Tsx, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x8Au8 => Operand { opcode: 0x8A, name: "TXA", operation: Operation::Txa, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x9Au8 => Operand { opcode: 0x9A, name: "TXS", operation: Operation::Txs, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
    0x98u8 => Operand { opcode: 0x98, name: "TYA", operation: Operation::Tya, addressing_mode: AddressingMode::Implicit, bytes: 1, cycles: 2, page_penalty: false },
};

// Dense decode table indexed directly by the opcode byte. Slots without a
// documented opcode stay None and fall through to the illegal-opcode policy.
static DECODE_TABLE: Lazy<[Option<&'static Operand>; 256]> = Lazy::new(|| {
    let mut table: [Option<&'static Operand>; 256] = [None; 256];
    for (opcode, operand) in OPERAND_MAP.entries() {
        table[*opcode as usize] = Some(operand);
    }
    table
});

// Undocumented opcodes still occupy well-known instruction shapes; when the
// policy is NopSkip the slot consumes the documented byte count and cycles.
fn illegal_nop_shape(opcode: u8) -> (u8, u8) {
    match opcode {
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => (2, 2),
        0x04 | 0x44 | 0x64 => (2, 3),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => (2, 4),
        0x0C => (3, 4),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => (3, 4),
        _ => (1, 2),
    }
}

impl<B: Bus> CPU<B> {
    // Addresses for fixed memory locations the core itself depends on.
    pub(crate) const STACK_BASE_ADDRESS: u16 = 0x0100;
    const STACK_ADDRESS_DEFAULT_WARM_START: u8 = 0xFD;
    const NMI_VECTOR_ADDRESS: u16 = 0xFFFA;
    const RESET_VECTOR_ADDRESS: u16 = 0xFFFC;
    pub(crate) const IRQ_VECTOR_ADDRESS: u16 = 0xFFFE;

    // Status after RESET: Interrupt Disable plus the always-on unused bit.
    const RESET_STATUS: u8 = 0x24;
    const INTERRUPT_CYCLES: u8 = 7;

    /// Binds the core to its bus and performs a RESET.
    pub fn new(bus: B) -> CPU<B> {
        let mut cpu = CPU {
            program_counter: 0x0000,
            stack_pointer: Self::STACK_ADDRESS_DEFAULT_WARM_START,
            accumulator: 0x00,
            x_register: 0x00,
            y_register: 0x00,
            status_register: Self::RESET_STATUS,
            cycles_remaining: 0,
            total_cycles: 0,
            opcode: 0x00,
            mode: AddressingMode::Implicit,
            effective_addr: 0x0000,
            operand: 0x00,
            rel_offset: 0,
            page_cross: false,
            nmi_pending: false,
            irq_pending: false,
            halted: false,
            fault: None,
            illegal_policy: IllegalOpcodePolicy::NopSkip,
            bus,
        };
        cpu.reset();
        cpu
    }

    pub fn set_illegal_policy(&mut self, policy: IllegalOpcodePolicy) {
        self.illegal_policy = policy;
    }

    pub fn fault(&self) -> Option<IllegalOpcode> {
        self.fault
    }

    /// RESET entry point: registers cleared, SP at the warm-start value, PC
    /// loaded from the reset vector, 7 cycles charged. No stack traffic.
    pub fn reset(&mut self) {
        self.accumulator = 0;
        self.x_register = 0;
        self.y_register = 0;
        self.stack_pointer = Self::STACK_ADDRESS_DEFAULT_WARM_START;
        self.status_register = Self::RESET_STATUS;
        self.program_counter = self.read_u16(Self::RESET_VECTOR_ADDRESS);
        self.cycles_remaining = Self::INTERRUPT_CYCLES;
        self.total_cycles = 0;
        self.nmi_pending = false;
        self.irq_pending = false;
        self.halted = false;
        self.fault = None;
    }

    /// Latches a non-maskable interrupt. Edge-triggered: taken once at the
    /// next instruction boundary, then the latch clears.
    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Asserts the IRQ line. Level-triggered: stays pending while the I flag
    /// masks it and is serviced at the first boundary where I is clear.
    pub fn irq(&mut self) {
        self.irq_pending = true;
    }

    /// Advances the core by one clock. At an instruction boundary this polls
    /// interrupts (NMI over IRQ) or fetches and executes one instruction,
    /// seeding the cycle countdown; on every call it burns exactly one tick.
    pub fn tick(&mut self) {
        if self.halted {
            return;
        }
        if self.cycles_remaining == 0 {
            if self.nmi_pending {
                self.nmi_pending = false;
                self.interrupt(Self::NMI_VECTOR_ADDRESS);
                self.cycles_remaining = Self::INTERRUPT_CYCLES;
            } else if self.irq_pending && !self.get_status_flag(StatusFlag::InterruptDisable) {
                self.irq_pending = false;
                self.interrupt(Self::IRQ_VECTOR_ADDRESS);
                self.cycles_remaining = Self::INTERRUPT_CYCLES;
            } else {
                self.cycles_remaining = self.fetch_and_execute();
                if self.halted {
                    return;
                }
            }
        }
        self.cycles_remaining -= 1;
        self.total_cycles += 1;
    }

    /// Ticks through to the next instruction boundary.
    pub fn step(&mut self) {
        loop {
            self.tick();
            if self.cycles_remaining == 0 || self.halted {
                break;
            }
        }
    }

    /// Drives the core one instruction at a time, invoking the callback before
    /// each one. The loop ends only if the core halts.
    pub fn run_with_callback<F>(&mut self, mut callback: F)
    where
        F: FnMut(&mut CPU<B>),
    {
        while !self.halted {
            callback(self);
            self.step();
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            program_counter: self.program_counter,
            stack_pointer: self.stack_pointer,
            accumulator: self.accumulator,
            x_register: self.x_register,
            y_register: self.y_register,
            // Bit 5 always reads as set from the outside.
            status_register: self.status_register | (1 << (StatusFlag::Unused as u8)),
            total_cycles: self.total_cycles,
        }
    }

    // Fetches, decodes, resolves addressing and executes one instruction.
    // Returns the total cycles it owes: base + page-cross penalty + whatever
    // the operation itself reports (branches). Handlers never touch the
    // cycle counters directly.
    fn fetch_and_execute(&mut self) -> u8 {
        let pc_of_opcode = self.program_counter;
        self.opcode = self.read_u8(pc_of_opcode);
        self.program_counter = pc_of_opcode.wrapping_add(1);

        match DECODE_TABLE[self.opcode as usize] {
            Some(operand_info) => {
                self.resolve_operand(operand_info.addressing_mode);
                let penalty = if operand_info.page_penalty && self.page_cross { 1 } else { 0 };
                let extra = self.execute(operand_info.operation);
                operand_info.cycles + penalty + extra
            }
            None => self.illegal_opcode(pc_of_opcode),
        }
    }

    fn illegal_opcode(&mut self, pc_of_opcode: u16) -> u8 {
        match self.illegal_policy {
            IllegalOpcodePolicy::NopSkip => {
                let (bytes, cycles) = illegal_nop_shape(self.opcode);
                // The opcode byte is already consumed; skip the rest.
                self.program_counter = self.program_counter.wrapping_add(bytes as u16 - 1);
                cycles
            }
            IllegalOpcodePolicy::Halt => {
                self.fault = Some(IllegalOpcode {
                    opcode: self.opcode,
                    pc: pc_of_opcode,
                });
                self.halted = true;
                0
            }
        }
    }

    fn execute(&mut self, operation: Operation) -> u8 {
        match operation {
            Operation::Adc => self.handle_adc(),
            Operation::And => self.handle_and(),
            Operation::Asl => self.handle_asl(),
            Operation::Bcc => self.handle_bcc(),
            Operation::Bcs => self.handle_bcs(),
            Operation::Beq => self.handle_beq(),
            Operation::Bit => self.handle_bit(),
            Operation::Bmi => self.handle_bmi(),
            Operation::Bne => self.handle_bne(),
            Operation::Bpl => self.handle_bpl(),
            Operation::Brk => self.handle_brk(),
            Operation::Bvc => self.handle_bvc(),
            Operation::Bvs => self.handle_bvs(),
            Operation::Clc => self.handle_clc(),
            Operation::Cld => self.handle_cld(),
            Operation::Cli => self.handle_cli(),
            Operation::Clv => self.handle_clv(),
            Operation::Cmp => self.handle_cmp(),
            Operation::Cpx => self.handle_cpx(),
            Operation::Cpy => self.handle_cpy(),
            Operation::Dec => self.handle_dec(),
            Operation::Dex => self.handle_dex(),
            Operation::Dey => self.handle_dey(),
            Operation::Eor => self.handle_eor(),
            Operation::Inc => self.handle_inc(),
            Operation::Inx => self.handle_inx(),
            Operation::Iny => self.handle_iny(),
            Operation::Jmp => self.handle_jmp(),
            Operation::Jsr => self.handle_jsr(),
            Operation::Lda => self.handle_lda(),
            Operation::Ldx => self.handle_ldx(),
            Operation::Ldy => self.handle_ldy(),
            Operation::Lsr => self.handle_lsr(),
            Operation::Nop => self.handle_nop(),
            Operation::Ora => self.handle_ora(),
            Operation::Pha => self.handle_pha(),
            Operation::Php => self.handle_php(),
            Operation::Pla => self.handle_pla(),
            Operation::Plp => self.handle_plp(),
            Operation::Rol => self.handle_rol(),
            Operation::Ror => self.handle_ror(),
            Operation::Rti => self.handle_rti(),
            Operation::Rts => self.handle_rts(),
            Operation::Sbc => self.handle_sbc(),
            Operation::Sec => self.handle_sec(),
            Operation::Sed => self.handle_sed(),
            Operation::Sei => self.handle_sei(),
            Operation::Sta => self.handle_sta(),
            Operation::Stx => self.handle_stx(),
            Operation::Sty => self.handle_sty(),
            Operation::Tax => self.handle_tax(),
            Operation::Tay => self.handle_tay(),
            Operation::Tsx => self.handle_tsx(),
            Operation::Txa => self.handle_txa(),
            Operation::Txs => self.handle_txs(),
            Operation::Tya => self.handle_tya(),
        }
    }

    // Resolves the operand for the given addressing mode: advances PC past
    // the operand bytes, fills the effective-address / immediate / relative
    // latches and flags page crossings for the indexed modes.
    pub(crate) fn resolve_operand(&mut self, mode: AddressingMode) {
        self.mode = mode;
        self.page_cross = false;
        match mode {
            // Accumulator and Implicit don't use memory operands.
            AddressingMode::Accumulator | AddressingMode::Implicit => {}

            AddressingMode::Immediate => {
                self.effective_addr = self.program_counter;
                self.operand = self.read_u8(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(1);
            }

            AddressingMode::ZeroPage => {
                self.effective_addr = self.read_u8(self.program_counter) as u16;
                self.program_counter = self.program_counter.wrapping_add(1);
            }

            AddressingMode::ZeroPageX => {
                let base = self.read_u8(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(1);
                self.effective_addr = base.wrapping_add(self.x_register) as u16;
            }

            AddressingMode::ZeroPageY => {
                let base = self.read_u8(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(1);
                self.effective_addr = base.wrapping_add(self.y_register) as u16;
            }

            AddressingMode::Relative => {
                self.rel_offset = self.read_u8(self.program_counter) as i8;
                self.program_counter = self.program_counter.wrapping_add(1);
            }

            AddressingMode::Absolute => {
                self.effective_addr = self.read_u16(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(2);
            }

            AddressingMode::AbsoluteX => {
                let base = self.read_u16(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(2);
                let addr = base.wrapping_add(self.x_register as u16);
                self.page_cross = (base ^ addr) & 0xFF00 != 0;
                self.effective_addr = addr;
            }

            AddressingMode::AbsoluteY => {
                let base = self.read_u16(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(2);
                let addr = base.wrapping_add(self.y_register as u16);
                self.page_cross = (base ^ addr) & 0xFF00 != 0;
                self.effective_addr = addr;
            }

            AddressingMode::Indirect => {
                let ptr = self.read_u16(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(2);
                // 6502 hardware bug: when the pointer sits at the end of a
                // page the high byte is fetched from the start of that same
                // page, not from the next one.
                let low = self.read_u8(ptr);
                let high = if ptr & 0x00FF == 0x00FF {
                    self.read_u8(ptr & 0xFF00)
                } else {
                    self.read_u8(ptr.wrapping_add(1))
                };
                self.effective_addr = u16::from_le_bytes([low, high]);
            }

            AddressingMode::IndirectX => {
                let base = self.read_u8(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(1);
                let zp = base.wrapping_add(self.x_register);
                self.effective_addr = self.read_u16_zero_page(zp);
            }

            AddressingMode::IndirectY => {
                let zp = self.read_u8(self.program_counter);
                self.program_counter = self.program_counter.wrapping_add(1);
                let base = self.read_u16_zero_page(zp);
                let addr = base.wrapping_add(self.y_register as u16);
                self.page_cross = (base ^ addr) & 0xFF00 != 0;
                self.effective_addr = addr;
            }
        }
    }

    // Returns the operand value for the instruction in flight. Immediate
    // operands were latched during addressing; everything else is read from
    // the effective address here, in program order, so write-only
    // instructions never trigger a read side effect.
    pub(crate) fn fetch_operand(&mut self) -> u8 {
        match self.mode {
            AddressingMode::Immediate
            | AddressingMode::Accumulator
            | AddressingMode::Implicit => self.operand,
            _ => {
                self.operand = self.read_u8(self.effective_addr);
                self.operand
            }
        }
    }

    /// Branch helper: centralizes branch behavior for relative branches.
    /// `condition` indicates whether the branch should be taken; the
    /// displacement comes from the relative-offset latch.
    /// Returns additional cycles: 0 if not taken, +1 if taken, +2 if page crossed.
    pub(crate) fn branch(&mut self, condition: bool) -> u8 {
        let mut additional_cycles: u8 = 0;
        if condition {
            let old_pc = self.program_counter;
            self.program_counter = old_pc.wrapping_add(self.rel_offset as u16);
            additional_cycles += 1; // branch taken
            if (old_pc & 0xFF00) != (self.program_counter & 0xFF00) {
                additional_cycles += 1; // page crossed
            }
        }
        additional_cycles
    }

    // Hardware interrupt sequence shared by NMI and IRQ: the pushed status
    // copy has B clear and the unused bit set, unlike the BRK/PHP copies.
    fn interrupt(&mut self, vector: u16) {
        self.push_u16(self.program_counter);
        let mut status = self.status_register;
        status &= !(1 << (StatusFlag::BreakCommand as u8));
        status |= 1 << (StatusFlag::Unused as u8);
        self.push_u8(status);
        self.set_status_flag(StatusFlag::InterruptDisable, true);
        self.program_counter = self.read_u16(vector);
    }

    pub(crate) fn read_u8(&mut self, addr: u16) -> u8 {
        self.bus.read(addr)
    }

    pub(crate) fn write_u8(&mut self, addr: u16, value: u8) {
        self.bus.write(addr, value);
    }

    pub(crate) fn read_u16(&mut self, addr: u16) -> u16 {
        // We use little-endian format: low byte at addr, high byte at addr + 1
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr.wrapping_add(1))])
    }

    // Pointer fetch that never leaves the zero page: the high byte comes from
    // (zp + 1) mod 256.
    pub(crate) fn read_u16_zero_page(&mut self, zp: u8) -> u16 {
        u16::from_le_bytes([
            self.read_u8(zp as u16),
            self.read_u8(zp.wrapping_add(1) as u16),
        ])
    }

    pub(crate) fn set_status_flag(&mut self, flag: StatusFlag, value: bool) {
        if value {
            self.status_register |= 1 << (flag as u8);
        } else {
            self.status_register &= !(1 << (flag as u8));
        }
    }

    pub(crate) fn get_status_flag(&self, flag: StatusFlag) -> bool {
        (self.status_register & (1 << (flag as u8))) != 0
    }

    /// Pushes a byte onto the stack.
    pub(crate) fn push_u8(&mut self, value: u8) {
        let stack_addr = Self::STACK_BASE_ADDRESS + self.stack_pointer as u16;
        self.write_u8(stack_addr, value);
        self.stack_pointer = self.stack_pointer.wrapping_sub(1);
    }

    /// Pushes a 16-bit word onto the stack.
    /// The high byte is pushed first, then the low byte, so they are stored in little-endian format on the stack.
    pub(crate) fn push_u16(&mut self, value: u16) {
        let [low, high] = value.to_le_bytes();
        // Push high byte first, then low byte
        self.push_u8(high);
        self.push_u8(low);
    }

    /// Pops a byte from the stack.
    pub(crate) fn pop_u8(&mut self) -> u8 {
        self.stack_pointer = self.stack_pointer.wrapping_add(1);
        let stack_addr = Self::STACK_BASE_ADDRESS + self.stack_pointer as u16;
        self.read_u8(stack_addr)
    }

    /// Pops a 16-bit word from the stack.
    /// The low byte is popped first, then the high byte, as they are stored in little-endian format on the stack.
    pub(crate) fn pop_u16(&mut self) -> u16 {
        let low = self.pop_u8();
        let high = self.pop_u8();
        u16::from_le_bytes([low, high])
    }
}

/// Formats the instruction the core is about to execute, nestest-style:
/// address, raw bytes, disassembly and the register file. Reads the
/// instruction bytes back through the bus.
pub fn trace<B: Bus>(cpu: &mut CPU<B>) -> String {
    let pc = cpu.program_counter;
    let opcode = cpu.read_u8(pc);

    let (raw, asm) = match OPERAND_MAP.get(&opcode) {
        Some(operand_info) => {
            let byte1 = if operand_info.bytes > 1 {
                cpu.read_u8(pc.wrapping_add(1))
            } else {
                0
            };
            let byte2 = if operand_info.bytes > 2 {
                cpu.read_u8(pc.wrapping_add(2))
            } else {
                0
            };
            let addr16 = u16::from_le_bytes([byte1, byte2]);

            let raw = match operand_info.bytes {
                1 => format!("{:02X}", operand_info.opcode),
                2 => format!("{:02X} {:02X}", operand_info.opcode, byte1),
                _ => format!("{:02X} {:02X} {:02X}", operand_info.opcode, byte1, byte2),
            };

            let name = operand_info.name;
            let asm = match operand_info.addressing_mode {
                AddressingMode::Implicit => name.to_string(),
                AddressingMode::Accumulator => format!("{} A", name),
                AddressingMode::Immediate => format!("{} #${:02X}", name, byte1),
                AddressingMode::ZeroPage => format!("{} ${:02X}", name, byte1),
                AddressingMode::ZeroPageX => format!("{} ${:02X},X", name, byte1),
                AddressingMode::ZeroPageY => format!("{} ${:02X},Y", name, byte1),
                AddressingMode::Relative => {
                    // Branch targets are shown resolved, relative to the next instruction.
                    let target = pc.wrapping_add(2).wrapping_add(byte1 as i8 as u16);
                    format!("{} ${:04X}", name, target)
                }
                AddressingMode::Absolute => format!("{} ${:04X}", name, addr16),
                AddressingMode::AbsoluteX => format!("{} ${:04X},X", name, addr16),
                AddressingMode::AbsoluteY => format!("{} ${:04X},Y", name, addr16),
                AddressingMode::Indirect => format!("{} (${:04X})", name, addr16),
                AddressingMode::IndirectX => format!("{} (${:02X},X)", name, byte1),
                AddressingMode::IndirectY => format!("{} (${:02X}),Y", name, byte1),
            };
            (raw, asm)
        }
        None => (format!("{:02X}", opcode), "???".to_string()),
    };

    let snapshot = cpu.snapshot();
    format!(
        "{:04X}  {:<8}  {:<11} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
        pc,
        raw,
        asm,
        snapshot.accumulator,
        snapshot.x_register,
        snapshot.y_register,
        snapshot.status_register,
        snapshot.stack_pointer,
        snapshot.total_cycles
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RamBus;
    use crate::test_helpers::{load_program, run_until_brk, test_cpu};

    #[test]
    fn test_reset_state() {
        let cpu = test_cpu();
        assert_eq!(cpu.program_counter, 0x8000);
        assert_eq!(cpu.stack_pointer, 0xFD);
        assert_eq!(cpu.accumulator, 0x00);
        assert_eq!(cpu.x_register, 0x00);
        assert_eq!(cpu.y_register, 0x00);
        assert_eq!(cpu.status_register, 0x24);
        assert_eq!(cpu.cycles_remaining, 7);
        assert_eq!(cpu.total_cycles, 0);
    }

    #[test]
    fn test_get_and_set_status_flags() {
        let mut cpu = test_cpu();
        cpu.status_register = 0;

        for flag in [
            StatusFlag::Carry,
            StatusFlag::Zero,
            StatusFlag::InterruptDisable,
            StatusFlag::DecimalMode,
            StatusFlag::BreakCommand,
            StatusFlag::Unused,
            StatusFlag::Overflow,
            StatusFlag::Negative,
        ] {
            assert_eq!(cpu.get_status_flag(flag), false,
                "flag {:?} should start as false", flag);

            cpu.set_status_flag(flag, true);
            assert_eq!(cpu.status_register & (1 << (flag as u8)), 1 << (flag as u8),
                "flag {:?} bit should be set", flag);
            assert_eq!(cpu.get_status_flag(flag), true);

            cpu.set_status_flag(flag, false);
            assert_eq!(cpu.get_status_flag(flag), false,
                "flag {:?} should be false after clear", flag);
        }
    }

    #[test]
    fn test_stack_push_pop_u8() {
        let mut cpu = test_cpu();
        cpu.stack_pointer = 0xFF;

        cpu.push_u8(0xAB);
        assert_eq!(cpu.stack_pointer, 0xFE);
        assert_eq!(cpu.read_u8(0x01FF), 0xAB);

        let popped_value = cpu.pop_u8();
        assert_eq!(popped_value, 0xAB);
        assert_eq!(cpu.stack_pointer, 0xFF);
    }

    #[test]
    fn test_stack_push_pop_u16() {
        let mut cpu = test_cpu();
        cpu.stack_pointer = 0xFF;
        cpu.push_u16(0x1234);
        assert_eq!(cpu.stack_pointer, 0xFD);
        let popped_value = cpu.pop_u16();
        assert_eq!(popped_value, 0x1234);
        assert_eq!(cpu.stack_pointer, 0xFF);
    }

    #[test]
    fn test_stack_wraps_within_page_one() {
        // Scenario: pushing with SP at 0x00 writes 0x0100 and wraps SP to 0xFF.
        let mut cpu = test_cpu();
        cpu.stack_pointer = 0x00;
        cpu.accumulator = 0xAB;
        cpu.handle_pha();
        assert_eq!(cpu.read_u8(0x0100), 0xAB);
        assert_eq!(cpu.stack_pointer, 0xFF);

        // Popping from 0xFF wraps back around.
        cpu.stack_pointer = 0xFF;
        assert_eq!(cpu.pop_u8(), 0xAB);
        assert_eq!(cpu.stack_pointer, 0x00);
    }

    #[test]
    fn test_resolve_immediate() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x42);
        cpu.resolve_operand(AddressingMode::Immediate);
        assert_eq!(cpu.operand, 0x42);
        assert_eq!(cpu.effective_addr, 0x9000);
        assert_eq!(cpu.program_counter, 0x9001);
    }

    #[test]
    fn test_resolve_zero_page() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x42);
        cpu.resolve_operand(AddressingMode::ZeroPage);
        assert_eq!(cpu.effective_addr, 0x0042);
        assert_eq!(cpu.program_counter, 0x9001);
    }

    #[test]
    fn test_resolve_zero_page_indexed_wraps() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xFE);
        cpu.x_register = 0x03;
        cpu.resolve_operand(AddressingMode::ZeroPageX);
        // (0xFE + 0x03) mod 256 stays inside the zero page.
        assert_eq!(cpu.effective_addr, 0x0001);

        cpu.program_counter = 0x9000;
        cpu.y_register = 0x05;
        cpu.resolve_operand(AddressingMode::ZeroPageY);
        assert_eq!(cpu.effective_addr, 0x0003);
    }

    #[test]
    fn test_resolve_absolute() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x34);
        cpu.write_u8(0x9001, 0x12);
        cpu.resolve_operand(AddressingMode::Absolute);
        assert_eq!(cpu.effective_addr, 0x1234);
        assert_eq!(cpu.program_counter, 0x9002);
    }

    #[test]
    fn test_resolve_absolute_x_reports_page_cross() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xFF);
        cpu.write_u8(0x9001, 0x20);
        cpu.x_register = 0x01;
        cpu.resolve_operand(AddressingMode::AbsoluteX);
        assert_eq!(cpu.effective_addr, 0x2100);
        assert!(cpu.page_cross);

        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x10);
        cpu.resolve_operand(AddressingMode::AbsoluteX);
        assert_eq!(cpu.effective_addr, 0x2011);
        assert!(!cpu.page_cross);
    }

    #[test]
    fn test_resolve_absolute_y_reports_page_cross() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xF0);
        cpu.write_u8(0x9001, 0x20);
        cpu.y_register = 0x20;
        cpu.resolve_operand(AddressingMode::AbsoluteY);
        assert_eq!(cpu.effective_addr, 0x2110);
        assert!(cpu.page_cross);
    }

    #[test]
    fn test_resolve_indirect_page_wrap_bug() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xFF);
        cpu.write_u8(0x9001, 0x30);
        // Pointer at 0x30FF: low byte there, high byte wraps to 0x3000.
        cpu.write_u8(0x30FF, 0xAD);
        cpu.write_u8(0x3000, 0xDE);
        cpu.write_u8(0x3100, 0x99); // must NOT be used
        cpu.resolve_operand(AddressingMode::Indirect);
        assert_eq!(cpu.effective_addr, 0xDEAD);
    }

    #[test]
    fn test_resolve_indirect_without_wrap() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x00);
        cpu.write_u8(0x9001, 0x20);
        cpu.write_u8(0x2000, 0x34);
        cpu.write_u8(0x2001, 0x56);
        cpu.resolve_operand(AddressingMode::Indirect);
        assert_eq!(cpu.effective_addr, 0x5634);
    }

    #[test]
    fn test_resolve_indexed_indirect_wraps_in_zero_page() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xFE);
        cpu.x_register = 0x01;
        // Pointer lives at 0xFF with its high byte wrapping to 0x00.
        cpu.write_u8(0x00FF, 0x34);
        cpu.write_u8(0x0000, 0x56);
        cpu.resolve_operand(AddressingMode::IndirectX);
        assert_eq!(cpu.effective_addr, 0x5634);
    }

    #[test]
    fn test_resolve_indirect_indexed_reports_page_cross() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0x20);
        cpu.write_u8(0x0020, 0xFF);
        cpu.write_u8(0x0021, 0x30);
        cpu.y_register = 0x01;
        cpu.resolve_operand(AddressingMode::IndirectY);
        assert_eq!(cpu.effective_addr, 0x3100);
        assert!(cpu.page_cross);
    }

    #[test]
    fn test_resolve_relative_latches_signed_offset() {
        let mut cpu = test_cpu();
        cpu.program_counter = 0x9000;
        cpu.write_u8(0x9000, 0xFE); // -2 in two's complement
        cpu.resolve_operand(AddressingMode::Relative);
        assert_eq!(cpu.rel_offset, -2);
        assert_eq!(cpu.program_counter, 0x9001);
    }

    #[test]
    fn test_tick_counts_every_cycle_once() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x42], 0x8000); // LDA #$42
        // Burn the 7 RESET cycles.
        for expected in 1..=7u64 {
            cpu.tick();
            assert_eq!(cpu.total_cycles, expected);
        }
        assert_eq!(cpu.cycles_remaining, 0);

        // LDA immediate takes exactly 2 ticks.
        cpu.tick();
        assert_eq!(cpu.accumulator, 0x42);
        assert_eq!(cpu.cycles_remaining, 1);
        cpu.tick();
        assert_eq!(cpu.cycles_remaining, 0);
        assert_eq!(cpu.total_cycles, 9);
    }

    #[test]
    fn test_cycles_remaining_is_zero_at_every_boundary() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x01, 0x69, 0x01, 0x85, 0x10, 0x00], 0x8000);
        for _ in 0..4 {
            cpu.step();
            assert_eq!(cpu.cycles_remaining, 0);
        }
    }

    #[test]
    fn test_page_cross_read_penalty() {
        // LDA $20FF,X with X=1 crosses into 0x2100 and costs 5 cycles.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xBD, 0xFF, 0x20], 0x8000);
        cpu.write_u8(0x2100, 0x55);
        cpu.x_register = 0x01;
        cpu.step(); // burns RESET stall
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.accumulator, 0x55);
        assert_eq!(cpu.total_cycles - before, 5);
    }

    #[test]
    fn test_store_never_pays_page_cross_penalty() {
        // STA $20FF,X with X=1 is always 5 cycles.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0x9D, 0xFF, 0x20], 0x8000);
        cpu.x_register = 0x01;
        cpu.accumulator = 0x77;
        cpu.step();
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.read_u8(0x2100), 0x77);
        assert_eq!(cpu.total_cycles - before, 5);
    }

    #[test]
    fn test_branch_cycle_accounting() {
        // Not taken: base 2 cycles.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xD0, 0x10], 0x8000); // BNE +16 with Z set
        cpu.step();
        cpu.set_status_flag(StatusFlag::Zero, true);
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.total_cycles - before, 2);
        assert_eq!(cpu.program_counter, 0x8002);

        // Taken, same page: base + 1.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xD0, 0x10], 0x8000); // BNE +16 with Z clear
        cpu.step();
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.total_cycles - before, 3);
        assert_eq!(cpu.program_counter, 0x8012);

        // Taken, crossing a page: base + 2.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xD0, 0x70], 0x80F0); // BNE +0x70 from 0x80F2
        cpu.write_u8(0xFFFC, 0xF0);
        cpu.write_u8(0xFFFD, 0x80);
        cpu.reset();
        cpu.step();
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.total_cycles - before, 4);
        assert_eq!(cpu.program_counter, 0x8162);
    }

    #[test]
    fn test_nmi_sequence_and_edge_latch() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xEA, 0xEA], 0x8000);
        cpu.write_u8(0xFFFA, 0x00);
        cpu.write_u8(0xFFFB, 0x90);
        cpu.step(); // RESET stall
        cpu.nmi();
        let sp_before = cpu.stack_pointer;
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.program_counter, 0x9000);
        assert_eq!(cpu.total_cycles - before, 7);
        assert!(cpu.get_status_flag(StatusFlag::InterruptDisable));

        // Pushed copy: return address then status with B clear, unused set.
        assert_eq!(cpu.stack_pointer, sp_before.wrapping_sub(3));
        let status = cpu.pop_u8();
        assert_eq!(status & (1 << (StatusFlag::BreakCommand as u8)), 0);
        assert_ne!(status & (1 << (StatusFlag::Unused as u8)), 0);
        assert_eq!(cpu.pop_u16(), 0x8000);

        // The latch cleared; the next boundary fetches the handler normally.
        cpu.stack_pointer = sp_before.wrapping_sub(3);
        cpu.write_u8(0x9000, 0xEA);
        cpu.step();
        assert_eq!(cpu.program_counter, 0x9001);
    }

    #[test]
    fn test_irq_masked_until_interrupt_disable_clears() {
        let mut cpu = test_cpu();
        // CLI; NOP at the reset target, handler full of NOPs at 0x9000.
        load_program(&mut cpu, &[0x58, 0xEA, 0xEA], 0x8000);
        cpu.write_u8(0xFFFE, 0x00);
        cpu.write_u8(0xFFFF, 0x90);
        cpu.step(); // RESET stall; I is set from reset
        cpu.irq();
        cpu.step(); // CLI executes, IRQ still pending (was masked at the boundary)
        assert_eq!(cpu.program_counter, 0x8001);
        cpu.step(); // now the boundary sees I clear and services the IRQ
        assert_eq!(cpu.program_counter, 0x9000);
        assert!(cpu.get_status_flag(StatusFlag::InterruptDisable));
    }

    #[test]
    fn test_nmi_wins_over_irq() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xEA], 0x8000);
        cpu.write_u8(0xFFFA, 0x00);
        cpu.write_u8(0xFFFB, 0x90);
        cpu.write_u8(0xFFFE, 0x00);
        cpu.write_u8(0xFFFF, 0xA0);
        cpu.step();
        cpu.set_status_flag(StatusFlag::InterruptDisable, false);
        cpu.nmi();
        cpu.irq();
        cpu.step();
        assert_eq!(cpu.program_counter, 0x9000);
    }

    #[test]
    fn test_snapshot_always_reads_unused_bit_set() {
        let mut cpu = test_cpu();
        cpu.status_register = 0x00;
        assert_ne!(cpu.snapshot().status_register & 0x20, 0);
    }

    #[test]
    fn test_illegal_opcode_nop_skip() {
        let mut cpu = test_cpu();
        // 0x80 is a two-byte NOP shape; 0x1A a one-byte one.
        load_program(&mut cpu, &[0x80, 0xFF, 0x1A], 0x8000);
        cpu.step();
        let before = cpu.total_cycles;
        cpu.step();
        assert_eq!(cpu.program_counter, 0x8002);
        assert_eq!(cpu.total_cycles - before, 2);
        cpu.step();
        assert_eq!(cpu.program_counter, 0x8003);
    }

    #[test]
    fn test_illegal_opcode_halt_records_fault() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0x02], 0x8000);
        cpu.set_illegal_policy(IllegalOpcodePolicy::Halt);
        cpu.step(); // RESET stall
        cpu.step();
        assert!(cpu.halted);
        let fault = cpu.fault().expect("fault should be recorded");
        assert_eq!(fault.opcode, 0x02);
        assert_eq!(fault.pc, 0x8000);
        assert_eq!(format!("{}", fault), "illegal opcode 02 at 8000");

        // Once halted the clock is dead.
        let cycles = cpu.total_cycles;
        cpu.tick();
        assert_eq!(cpu.total_cycles, cycles);
    }

    #[test]
    fn test_program_load_transfer_store() {
        // LDA #$42, TAX, STX $10, BRK
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x42, 0xAA, 0x86, 0x10, 0x00], 0x8000);
        run_until_brk(&mut cpu);
        assert_eq!(cpu.accumulator, 0x42);
        assert_eq!(cpu.x_register, 0x42);
        assert_eq!(cpu.read_u8(0x0010), 0x42);
        assert_eq!(cpu.get_status_flag(StatusFlag::Zero), false);
        assert_eq!(cpu.get_status_flag(StatusFlag::Negative), false);
        assert_eq!(cpu.program_counter, 0x8006);
    }

    #[test]
    fn test_program_adc_signed_overflow() {
        // LDA #$7F, ADC #$01, BRK. Carry starts clear after reset.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x7F, 0x69, 0x01, 0x00], 0x8000);
        run_until_brk(&mut cpu);
        assert_eq!(cpu.accumulator, 0x80);
        assert_eq!(cpu.get_status_flag(StatusFlag::Negative), true);
        assert_eq!(cpu.get_status_flag(StatusFlag::Overflow), true);
        assert_eq!(cpu.get_status_flag(StatusFlag::Carry), false);
        assert_eq!(cpu.get_status_flag(StatusFlag::Zero), false);
    }

    #[test]
    fn test_program_branch_taken_in_page() {
        // LDA #$00 sets Z, BEQ +4 from 0x80FE lands at 0x8104 in 3 cycles
        // (taken, no crossing: the displacement is relative to 0x8100).
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x00, 0xF0, 0x04], 0x80FC);
        cpu.write_u8(0xFFFC, 0xFC);
        cpu.write_u8(0xFFFD, 0x80);
        cpu.reset();
        run_until_brk(&mut cpu);
        assert_eq!(cpu.program_counter, 0x8105); // BRK opcode at 0x8104 consumed
        assert_eq!(cpu.total_cycles, 7 + 2 + 3);
    }

    #[test]
    fn test_program_branch_taken_page_cross() {
        // BEQ from 0x80E2 with displacement 0x20: 0x80E4 + 0x20 = 0x8104
        // crosses out of page 0x80 and costs 4 cycles.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x00, 0xF0, 0x20], 0x80E0);
        cpu.write_u8(0xFFFC, 0xE0);
        cpu.write_u8(0xFFFD, 0x80);
        cpu.reset();
        run_until_brk(&mut cpu);
        assert_eq!(cpu.program_counter, 0x8105);
        assert_eq!(cpu.total_cycles, 7 + 2 + 4);
    }

    #[test]
    fn test_program_jsr_rts_round_trip() {
        // JSR $8008; subroutine LDA #$22, RTS; then LDA #$11, BRK.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0x20, 0x08, 0x80, 0xA9, 0x11, 0x00], 0x8000);
        load_program(&mut cpu, &[0xA9, 0x22, 0x60], 0x8008);
        let sp_before = cpu.stack_pointer;
        run_until_brk(&mut cpu);
        assert_eq!(cpu.accumulator, 0x11);
        assert_eq!(cpu.stack_pointer, sp_before);
        assert_eq!(cpu.program_counter, 0x8006);
    }

    #[test]
    fn test_program_jmp_indirect_page_wrap() {
        // JMP ($30FF) with the pointer split across the page-wrap bug.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0x6C, 0xFF, 0x30], 0x8000);
        cpu.write_u8(0x30FF, 0xAD);
        cpu.write_u8(0x3000, 0xDE);
        cpu.step(); // RESET stall
        cpu.step();
        assert_eq!(cpu.program_counter, 0xDEAD);
    }

    #[test]
    fn test_adc_is_sbc_with_inverted_operand() {
        // ADC(a, b, c) and SBC(a, !b, c) must agree on A, N, Z, C and V.
        let samples = [0x00u8, 0x01, 0x3F, 0x40, 0x7F, 0x80, 0x81, 0xC0, 0xFF];
        for &a in &samples {
            for &b in &samples {
                for carry in [false, true] {
                    let mut adc_cpu = test_cpu();
                    adc_cpu.accumulator = a;
                    adc_cpu.set_status_flag(StatusFlag::Carry, carry);
                    adc_cpu.mode = AddressingMode::Immediate;
                    adc_cpu.operand = b;
                    adc_cpu.handle_adc();

                    let mut sbc_cpu = test_cpu();
                    sbc_cpu.accumulator = a;
                    sbc_cpu.set_status_flag(StatusFlag::Carry, carry);
                    sbc_cpu.mode = AddressingMode::Immediate;
                    sbc_cpu.operand = !b;
                    sbc_cpu.handle_sbc();

                    assert_eq!(adc_cpu.accumulator, sbc_cpu.accumulator,
                        "A mismatch for a={:02X} b={:02X} c={}", a, b, carry);
                    assert_eq!(adc_cpu.status_register, sbc_cpu.status_register,
                        "P mismatch for a={:02X} b={:02X} c={}", a, b, carry);
                }
            }
        }
    }

    #[test]
    fn test_zero_and_negative_follow_the_result() {
        for value in 0..=255u8 {
            let mut cpu = test_cpu();
            cpu.mode = AddressingMode::Immediate;
            cpu.operand = value;
            cpu.handle_lda();
            assert_eq!(cpu.get_status_flag(StatusFlag::Negative), (value >> 7) & 1 == 1);
            assert_eq!(cpu.get_status_flag(StatusFlag::Zero), value == 0);
        }
    }

    #[test]
    fn test_decimal_flag_is_inert() {
        // SED then ADC: the D flag must not change the binary result.
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xF8, 0xA9, 0x09, 0x69, 0x01, 0x00], 0x8000);
        run_until_brk(&mut cpu);
        assert!(cpu.get_status_flag(StatusFlag::DecimalMode));
        assert_eq!(cpu.accumulator, 0x0A); // not BCD 0x10
    }

    #[test]
    fn test_brk_pushes_status_with_break_set() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0x00], 0x8000);
        cpu.write_u8(0xFFFE, 0x34);
        cpu.write_u8(0xFFFF, 0x12);
        cpu.step(); // RESET stall
        cpu.step(); // BRK
        assert_eq!(cpu.program_counter, 0x1234);
        assert!(cpu.get_status_flag(StatusFlag::InterruptDisable));
        let status = cpu.pop_u8();
        assert_ne!(status & (1 << (StatusFlag::BreakCommand as u8)), 0);
        assert_ne!(status & (1 << (StatusFlag::Unused as u8)), 0);
        // Return address is the byte after BRK's padding slot.
        assert_eq!(cpu.pop_u16(), 0x8002);
    }

    #[test]
    fn test_trace_formats_the_next_instruction() {
        let mut cpu = test_cpu();
        load_program(&mut cpu, &[0xA9, 0x42], 0x8000);
        let line = trace(&mut cpu);
        assert!(line.starts_with("8000  A9 42"), "unexpected trace: {}", line);
        assert!(line.contains("LDA #$42"), "unexpected trace: {}", line);
        assert!(line.contains("P:24"), "unexpected trace: {}", line);
        assert!(line.contains("SP:FD"), "unexpected trace: {}", line);
    }

    #[test]
    fn test_decode_table_covers_all_documented_opcodes() {
        let documented = DECODE_TABLE.iter().filter(|entry| entry.is_some()).count();
        assert_eq!(documented, 151);
        // Spot-check that the entry agrees with its index.
        for (index, entry) in DECODE_TABLE.iter().enumerate() {
            if let Some(operand_info) = entry {
                assert_eq!(operand_info.opcode as usize, index);
            }
        }
    }

    #[test]
    fn test_cpu_can_run_on_any_bus() {
        // The core only needs the two-operation contract.
        struct CountingBus {
            inner: RamBus,
            reads: u32,
        }
        impl Bus for CountingBus {
            fn read(&mut self, addr: u16) -> u8 {
                self.reads += 1;
                self.inner.read(addr)
            }
            fn write(&mut self, addr: u16, data: u8) {
                self.inner.write(addr, data);
            }
        }

        let mut inner = RamBus::new();
        inner.memory[0xFFFC] = 0x00;
        inner.memory[0xFFFD] = 0x80;
        inner.memory[0x8000] = 0xEA;
        let mut cpu = CPU::new(CountingBus { inner, reads: 0 });
        cpu.step();
        cpu.step();
        assert_eq!(cpu.program_counter, 0x8001);
        assert!(cpu.bus.reads > 0);
    }
}
