//! Integration tests for the QVM.
//!
//! Organized by instruction group, then calls, syscalls, the watchdog and
//! breakpoints. Programs are built directly from instructions; constants
//! that do not fit a 24-bit immediate are placed in the data segment.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use qvm_common::instruction::{IMMEDIATE_MAX, IMMEDIATE_MIN};
use qvm_common::{Instruction, Module, Opcode};
use qvm_vm::{
    from_fn, load, run, CallFrame, Exit, NoHost, Observer, Step, Syscall, SyscallHandler,
    TracingObserver, Vm, VmConfig, VmFault, OPERAND_STACK_SIZE,
};

// ============================================================
// Helper functions
// ============================================================

fn op(opcode: Opcode) -> Instruction {
    Instruction::bare(opcode)
}

fn imm(opcode: Opcode, value: i32) -> Instruction {
    Instruction::new(opcode, value)
}

fn konst(value: i32) -> Instruction {
    imm(Opcode::Const, value)
}

/// Little-endian bytes for a run of words, for use as a data segment.
fn words(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn float_word(f: f32) -> i32 {
    f.to_bits() as i32
}

fn run_code(code: Vec<Instruction>) -> Result<Exit, VmFault> {
    run(&Module::new(code))
}

/// Run a module and return the value it produced.
fn eval_module(module: &Module) -> i32 {
    match run(module).unwrap() {
        Exit::Return(v) => v,
        other => panic!("expected a return, got {other:?}"),
    }
}

fn eval(code: Vec<Instruction>) -> i32 {
    eval_module(&Module::new(code))
}

/// Syscall handler that records every call and answers with a fixed reply.
#[derive(Default)]
struct Recorder {
    calls: Vec<(i32, Vec<i32>)>,
    reply: Option<i32>,
}

impl SyscallHandler for Recorder {
    fn syscall(&mut self, call: &mut Syscall<'_>) -> Option<i32> {
        self.calls.push((call.id(), call.args().to_vec()));
        self.reply
    }
}

/// Observer that records `(ip, program_stack)` for every step.
#[derive(Clone, Default)]
struct StackLog(Arc<Mutex<Vec<(usize, u32)>>>);

impl Observer for StackLog {
    fn on_step(&mut self, step: &Step) {
        self.0.lock().unwrap().push((step.ip, step.program_stack));
    }
}

// ============================================================
// Basic evaluation
// ============================================================

#[test]
fn const_2_const_3_add_returns_5() {
    assert_eq!(
        run_code(vec![konst(2), konst(3), op(Opcode::Add)]).unwrap(),
        Exit::Return(5)
    );
}

#[test]
fn empty_operand_stack_returns_zero() {
    assert_eq!(run_code(vec![op(Opcode::Ignore)]).unwrap(), Exit::Return(0));
}

#[test]
fn push_and_pop() {
    assert_eq!(eval(vec![imm(Opcode::Push, 4), konst(9), op(Opcode::Pop)]), 4);
}

#[test]
fn load_then_run_encoded_module() {
    let module = Module::new(vec![konst(20), konst(22), op(Opcode::Add)]);
    let loaded = load(&module.encode()).unwrap();
    assert_eq!(eval_module(&loaded), 42);
}

#[test]
fn cycle_count_matches_instructions_executed() {
    let module = Module::new(vec![konst(1), konst(2), op(Opcode::Add)]);
    let mut vm = Vm::new(&module).unwrap();
    vm.call(0, &[]).unwrap();
    assert_eq!(vm.cycle_count(), 3);
}

#[test]
fn break_is_counted_and_otherwise_ignored() {
    let module = Module::new(vec![op(Opcode::Break), konst(1), op(Opcode::Break)]);
    let mut vm = Vm::new(&module).unwrap();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(1));
    assert_eq!(vm.break_count(), 2);
}

// ============================================================
// Integer arithmetic
// ============================================================

#[test]
fn sub_is_second_minus_top() {
    assert_eq!(eval(vec![konst(10), konst(3), op(Opcode::Sub)]), 7);
}

#[test]
fn add_wraps() {
    let module = Module::new(vec![konst(0), op(Opcode::Load4), konst(1), op(Opcode::Add)])
        .with_data(words(&[i32::MAX]));
    assert_eq!(eval_module(&module), i32::MIN);
}

#[test]
fn signed_and_unsigned_division() {
    assert_eq!(eval(vec![konst(-7), konst(2), op(Opcode::Divi)]), -3);
    assert_eq!(eval(vec![konst(-7), konst(2), op(Opcode::Modi)]), -1);
    assert_eq!(
        eval(vec![konst(-2), konst(2), op(Opcode::Divu)]),
        (u32::MAX / 2) as i32
    );
    assert_eq!(eval(vec![konst(-1), konst(10), op(Opcode::Modu)]), 5);
}

#[test]
fn divi_min_by_minus_one_wraps() {
    let module = Module::new(vec![konst(0), op(Opcode::Load4), konst(-1), op(Opcode::Divi)])
        .with_data(words(&[i32::MIN]));
    assert_eq!(eval_module(&module), i32::MIN);
}

#[test]
fn division_by_zero_faults() {
    for (opcode, name) in [
        (Opcode::Divi, "DIVI"),
        (Opcode::Divu, "DIVU"),
        (Opcode::Modi, "MODI"),
        (Opcode::Modu, "MODU"),
    ] {
        assert_eq!(
            run_code(vec![konst(1), konst(0), op(opcode)]),
            Err(VmFault::DivisionByZero { at: 2, opcode: name })
        );
    }
}

#[test]
fn multiplication() {
    assert_eq!(eval(vec![konst(-6), konst(7), op(Opcode::Muli)]), -42);
    assert_eq!(eval(vec![konst(-6), konst(7), op(Opcode::Mulu)]), -42);
}

#[test]
fn negate_and_complement() {
    assert_eq!(eval(vec![konst(5), op(Opcode::Negi)]), -5);
    assert_eq!(eval(vec![konst(0), op(Opcode::Bcom)]), -1);
}

#[test]
fn sign_extension() {
    assert_eq!(eval(vec![konst(0xFF), op(Opcode::Sex8)]), -1);
    assert_eq!(eval(vec![konst(0x7F), op(Opcode::Sex8)]), 127);
    assert_eq!(eval(vec![konst(0x8000), op(Opcode::Sex16)]), -32768);
    assert_eq!(eval(vec![konst(0x1_2345), op(Opcode::Sex16)]), 0x2345);
}

#[test]
fn bitwise_ops() {
    assert_eq!(eval(vec![konst(0b1100), konst(0b1010), op(Opcode::Band)]), 0b1000);
    assert_eq!(eval(vec![konst(0b1100), konst(0b1010), op(Opcode::Bor)]), 0b1110);
    assert_eq!(eval(vec![konst(0b1100), konst(0b1010), op(Opcode::Bxor)]), 0b0110);
}

#[test]
fn shifts_mask_count_to_five_bits() {
    assert_eq!(eval(vec![konst(1), konst(4), op(Opcode::Lsh)]), 16);
    assert_eq!(eval(vec![konst(1), konst(33), op(Opcode::Lsh)]), 2);
    assert_eq!(eval(vec![konst(-8), konst(1), op(Opcode::Rshi)]), -4);
    assert_eq!(eval(vec![konst(-8), konst(1), op(Opcode::Rshu)]), 0x7FFF_FFFC);
}

// ============================================================
// Comparisons
// ============================================================

#[test]
fn comparisons_push_one_or_zero() {
    assert_eq!(eval(vec![konst(3), konst(3), op(Opcode::Eq)]), 1);
    assert_eq!(eval(vec![konst(3), konst(4), op(Opcode::Eq)]), 0);
    assert_eq!(eval(vec![konst(3), konst(4), op(Opcode::Ne)]), 1);
    assert_eq!(eval(vec![konst(3), konst(4), op(Opcode::Lei)]), 1);
    assert_eq!(eval(vec![konst(4), konst(4), op(Opcode::Gei)]), 1);
    assert_eq!(eval(vec![konst(4), konst(3), op(Opcode::Gti)]), 1);
}

#[test]
fn signed_vs_unsigned_comparison() {
    assert_eq!(eval(vec![konst(-1), konst(1), op(Opcode::Lti)]), 1);
    assert_eq!(eval(vec![konst(-1), konst(1), op(Opcode::Ltu)]), 0);
    assert_eq!(eval(vec![konst(-1), konst(1), op(Opcode::Gtu)]), 1);
    assert_eq!(eval(vec![konst(-1), konst(-1), op(Opcode::Leu)]), 1);
    assert_eq!(eval(vec![konst(0), konst(-1), op(Opcode::Geu)]), 0);
}

#[test]
fn comparisons_do_not_branch() {
    // EQ is followed by an ordinary instruction, which must run.
    assert_eq!(
        eval(vec![konst(1), konst(1), op(Opcode::Eq), konst(10), op(Opcode::Add)]),
        11
    );
}

// ============================================================
// Floats
// ============================================================

fn float_binop(a: f32, b: f32, opcode: Opcode) -> i32 {
    let module = Module::new(vec![
        konst(0),
        op(Opcode::Load4),
        konst(4),
        op(Opcode::Load4),
        op(opcode),
    ])
    .with_data(words(&[float_word(a), float_word(b)]));
    eval_module(&module)
}

#[test]
fn float_arithmetic() {
    assert_eq!(float_binop(1.5, 2.25, Opcode::Addf), float_word(3.75));
    assert_eq!(float_binop(1.5, 2.25, Opcode::Subf), float_word(-0.75));
    assert_eq!(float_binop(1.5, 2.0, Opcode::Mulf), float_word(3.0));
    assert_eq!(float_binop(3.0, 2.0, Opcode::Divf), float_word(1.5));
}

#[test]
fn float_division_by_zero_does_not_fault() {
    assert_eq!(float_binop(1.0, 0.0, Opcode::Divf), float_word(f32::INFINITY));
    assert_eq!(float_binop(-1.0, 0.0, Opcode::Divf), float_word(f32::NEG_INFINITY));
    let nan = float_binop(0.0, 0.0, Opcode::Divf);
    assert!(f32::from_bits(nan as u32).is_nan());
}

#[test]
fn float_comparisons_follow_ieee() {
    assert_eq!(float_binop(1.0, 2.0, Opcode::Ltf), 1);
    assert_eq!(float_binop(2.0, 2.0, Opcode::Lef), 1);
    assert_eq!(float_binop(2.0, 1.0, Opcode::Gtf), 1);
    assert_eq!(float_binop(1.0, 1.0, Opcode::Gef), 1);
    assert_eq!(float_binop(-0.0, 0.0, Opcode::Eqf), 1);
    assert_eq!(float_binop(f32::NAN, f32::NAN, Opcode::Eqf), 0);
    assert_eq!(float_binop(f32::NAN, f32::NAN, Opcode::Nef), 1);
    assert_eq!(float_binop(f32::NAN, 1.0, Opcode::Ltf), 0);
}

#[test]
fn negf_flips_sign() {
    let module = Module::new(vec![konst(0), op(Opcode::Load4), op(Opcode::Negf)])
        .with_data(words(&[float_word(2.5)]));
    assert_eq!(eval_module(&module), float_word(-2.5));
}

#[test]
fn cvif_and_cvfi_convert_numerically() {
    assert_eq!(eval(vec![konst(7), op(Opcode::Cvif)]), float_word(7.0));
    assert_eq!(eval(vec![konst(-7), op(Opcode::Cvif), op(Opcode::Cvfi)]), -7);
}

#[test]
fn cvfi_truncates_and_saturates() {
    let convert = |f: f32| {
        let module = Module::new(vec![konst(0), op(Opcode::Load4), op(Opcode::Cvfi)])
            .with_data(words(&[float_word(f)]));
        eval_module(&module)
    };
    assert_eq!(convert(2.9), 2);
    assert_eq!(convert(-2.9), -2);
    assert_eq!(convert(1e10), i32::MAX);
    assert_eq!(convert(-1e10), i32::MIN);
    assert_eq!(convert(f32::NAN), 0);
}

// CVIF is a value conversion, so integers past f32's 24-bit mantissa round.
#[test]
fn numeric_round_trip_breaks_past_two_to_the_24() {
    let module = Module::new(vec![
        konst(0),
        op(Opcode::Load4),
        op(Opcode::Cvif),
        op(Opcode::Cvfi),
    ])
    .with_data(words(&[(1 << 24) + 1]));
    assert_eq!(eval_module(&module), 1 << 24);
}

// ============================================================
// Memory
// ============================================================

#[test]
fn loads_zero_extend() {
    let data = vec![0xFF, 0xFF, 0xFF, 0xFF];
    let load = |opcode| {
        let module = Module::new(vec![konst(0), op(opcode)]).with_data(data.clone());
        eval_module(&module)
    };
    assert_eq!(load(Opcode::Load1), 0xFF);
    assert_eq!(load(Opcode::Load2), 0xFFFF);
    assert_eq!(load(Opcode::Load4), -1);
}

#[test]
fn narrow_stores_write_low_bits() {
    let module = Module::new(vec![
        konst(0),
        konst(0x1234),
        op(Opcode::Store2),
        konst(2),
        konst(0x1AB),
        op(Opcode::Store1),
        konst(0),
        op(Opcode::Load4),
    ])
    .with_bss(4);
    assert_eq!(eval_module(&module), 0x00AB_1234);
}

#[test]
fn literals_follow_data() {
    let module = Module::new(vec![konst(2), op(Opcode::Load1)])
        .with_data(vec![1, 2])
        .with_literals(b"Q\0".to_vec());
    assert_eq!(eval_module(&module), b'Q' as i32);
}

#[test]
fn block_copy_pops_source_then_destination() {
    let module = Module::new(vec![
        konst(4),
        konst(0),
        imm(Opcode::BlockCopy, 4),
        konst(4),
        op(Opcode::Load4),
    ])
    .with_data(b"abcd".to_vec())
    .with_bss(4);
    let mut vm = Vm::new(&module).unwrap();
    let exit = vm.call(0, &[]).unwrap();
    assert_eq!(exit, Exit::Return(i32::from_le_bytes(*b"abcd")));
    assert_eq!(&vm.memory().as_bytes()[..8], b"abcdabcd");
}

#[test]
fn block_copy_checks_both_ranges_first() {
    let module = Module::new(vec![konst(0), konst(-8), imm(Opcode::BlockCopy, 4)])
        .with_data(b"wxyz".to_vec());
    let mut vm = Vm::new(&module).unwrap();
    let before = vm.memory().clone();
    let err = vm.call(0, &[]).unwrap_err();
    assert!(matches!(err, VmFault::OutOfBounds { at: 2, opcode: "BLOCK_COPY", .. }));
    assert_eq!(vm.memory(), &before);
}

#[test]
fn out_of_bounds_load_faults() {
    assert_eq!(
        run_code(vec![konst(-4), op(Opcode::Load4)]),
        Err(VmFault::OutOfBounds {
            at: 1,
            opcode: "LOAD4",
            address: u32::MAX - 3,
            len: 4
        })
    );
}

#[test]
fn memory_persists_across_calls_until_reset() {
    let module = Module::new(vec![
        konst(0),
        konst(0),
        op(Opcode::Load4),
        konst(1),
        op(Opcode::Add),
        op(Opcode::Store4),
        konst(0),
        op(Opcode::Load4),
    ])
    .with_bss(4);
    let mut vm = Vm::new(&module).unwrap();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(1));
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(2));
    vm.reset();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(1));
}

#[test]
fn vms_sharing_a_module_have_separate_memory() {
    let module = Module::new(vec![konst(0), konst(9), op(Opcode::Store4)]).with_bss(4);
    let mut first = Vm::new(&module).unwrap();
    let second = Vm::new(&module).unwrap();
    first.call(0, &[]).unwrap();
    assert_eq!(first.memory().read_i32(0).unwrap(), 9);
    assert_eq!(second.memory().read_i32(0).unwrap(), 0);
}

#[test]
fn host_string_helpers() {
    let module = Module::new(vec![op(Opcode::Ignore)]).with_bss(16);
    let mut vm = Vm::new(&module).unwrap();
    assert_eq!(vm.write_string(0, "hello world", 6).unwrap(), 5);
    assert_eq!(vm.read_string(0, 16).unwrap(), "hello");
    assert!(vm.write_string(u32::MAX, "x", 4).is_err());
}

// ============================================================
// Frames and calls
// ============================================================

#[test]
fn locals_live_in_the_frame() {
    let code = vec![
        imm(Opcode::Enter, 8),
        imm(Opcode::Local, 4),
        konst(42),
        op(Opcode::Store4),
        imm(Opcode::Local, 4),
        op(Opcode::Load4),
        imm(Opcode::Leave, 8),
    ];
    assert_eq!(eval(code), 42);
}

#[test]
fn entry_arguments_follow_the_return_slot() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 8),
        imm(Opcode::Local, 12),
        op(Opcode::Load4),
        imm(Opcode::Local, 16),
        op(Opcode::Load4),
        op(Opcode::Sub),
        imm(Opcode::Leave, 8),
    ]);
    let mut vm = Vm::new(&module).unwrap();
    let top = vm.program_stack();
    assert_eq!(vm.call(0, &[10, 3]).unwrap(), Exit::Return(7));
    assert_eq!(vm.program_stack(), top);
}

fn nested_call_module() -> Module {
    Module::new(vec![
        imm(Opcode::Enter, 8), // 0
        konst(5),
        imm(Opcode::Arg, 4),
        konst(8),
        op(Opcode::Call),
        konst(1), // 5: return address
        op(Opcode::Add),
        imm(Opcode::Leave, 8),
        imm(Opcode::Enter, 4), // 8: callee
        imm(Opcode::Local, 8),
        op(Opcode::Load4),
        konst(10),
        op(Opcode::Muli),
        imm(Opcode::Leave, 4),
    ])
}

#[test]
fn call_and_return() {
    assert_eq!(eval_module(&nested_call_module()), 51);
}

#[test]
fn call_history_tracks_bytecode_frames() {
    let module = nested_call_module();
    let mut vm = Vm::new(&module).unwrap();
    let top = vm.program_stack();
    vm.set_breakpoint(9);

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Breakpoint(9));
    assert_eq!(
        vm.call_history(),
        &[CallFrame {
            return_ip: 5,
            program_stack: top - 4 - 8,
            operand_depth: 0,
        }]
    );

    assert_eq!(vm.resume().unwrap(), Exit::Return(51));
    assert!(vm.call_history().is_empty());
}

#[test]
fn call_as_last_instruction_returns_past_the_end() {
    let module = Module::new(vec![
        konst(3),
        op(Opcode::Jump),
        imm(Opcode::Leave, 0), // 2: callee
        imm(Opcode::Enter, 4), // 3
        konst(2),
        op(Opcode::Call), // 5: return address is 6, one past the end
    ]);
    assert_eq!(run(&module).unwrap(), Exit::Return(0));
}

#[test]
fn invalid_targets_fault() {
    assert_eq!(
        run_code(vec![konst(99), op(Opcode::Jump)]),
        Err(VmFault::InvalidJumpTarget { at: 1, target: 99 })
    );
    assert_eq!(
        run_code(vec![imm(Opcode::Enter, 8), konst(99), op(Opcode::Call)]),
        Err(VmFault::InvalidCallTarget { at: 2, target: 99 })
    );
}

#[test]
fn corrupt_return_address_faults() {
    let code = vec![
        imm(Opcode::Enter, 4),
        imm(Opcode::Local, 0),
        konst(9999),
        op(Opcode::Store4),
        imm(Opcode::Leave, 0),
    ];
    assert_eq!(
        run_code(code),
        Err(VmFault::InvalidReturnAddress { at: 4, address: 9999 })
    );
}

#[test]
fn program_stack_bounds_fault() {
    assert!(matches!(
        run_code(vec![imm(Opcode::Enter, 0x7F_FFF0)]),
        Err(VmFault::ProgramStackOverflow { at: 0, .. })
    ));
    assert!(matches!(
        run_code(vec![imm(Opcode::Leave, 8)]),
        Err(VmFault::ProgramStackUnderflow { at: 0, .. })
    ));
}

#[test]
fn bad_entry_point() {
    let module = Module::new(vec![konst(1)]);
    let mut vm = Vm::new(&module).unwrap();
    assert_eq!(
        vm.call(5, &[]),
        Err(VmFault::InstructionPointerOutOfRange { ip: 5 })
    );
}

// ============================================================
// Opcode faults and stack limits
// ============================================================

#[test]
fn undef_and_unknown_opcodes_fault() {
    assert_eq!(
        run_code(vec![op(Opcode::Undef)]),
        Err(VmFault::UndefinedInstruction { at: 0 })
    );
    assert_eq!(
        run_code(vec![op(Opcode::Ignore), Instruction::raw(0x99, 0)]),
        Err(VmFault::UnknownOpcode { at: 1, opcode: 0x99 })
    );
}

#[test]
fn operand_stack_limits() {
    assert_eq!(
        run_code(vec![op(Opcode::Add)]),
        Err(VmFault::OperandStackUnderflow { at: 0 })
    );
    assert_eq!(
        run_code(vec![konst(1); OPERAND_STACK_SIZE + 1]),
        Err(VmFault::OperandStackOverflow {
            at: OPERAND_STACK_SIZE
        })
    );
}

#[test]
fn arena_too_large_is_reported() {
    let module = Module::new(vec![konst(1)]).with_bss(1 << 20);
    let err = Vm::with_config(&module, VmConfig::default().with_max_memory(1 << 16))
        .err()
        .unwrap();
    assert!(matches!(err, VmFault::ArenaTooLarge { .. }));
}

// ============================================================
// Syscalls
// ============================================================

#[test]
fn call_minus_5_invokes_syscall_5_once() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 16),
        konst(7),
        imm(Opcode::Arg, 4),
        konst(9),
        imm(Opcode::Arg, 8),
        konst(-5),
        op(Opcode::Call),
        imm(Opcode::Leave, 16),
    ]);
    let host = Recorder {
        reply: Some(99),
        ..Default::default()
    };
    let mut vm = Vm::with_host(&module, VmConfig::default(), host).unwrap();

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(99));
    let calls = &vm.host().calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 5);
    assert_eq!(&calls[0].1[..2], &[7, 9]);
    assert_eq!(calls[0].1.len(), qvm_vm::MAX_SYSCALL_ARGS);
}

#[test]
fn syscall_without_result_leaves_stack_alone() {
    let code = vec![
        imm(Opcode::Enter, 8),
        konst(11),
        konst(-1),
        op(Opcode::Call),
        imm(Opcode::Leave, 8),
    ];
    assert_eq!(eval(code), 11);
}

#[test]
fn syscall_args_stop_at_arena_end() {
    let module = Module::new(vec![konst(-3), op(Opcode::Call)]);
    let mut vm = Vm::with_host(&module, VmConfig::default(), Recorder::default()).unwrap();
    vm.call(0, &[]).unwrap();
    // Entry ps is two words below the end; only one word lies above it.
    assert_eq!(vm.host().calls, vec![(3, vec![0])]);
}

#[test]
fn syscall_in_entry_frame_keeps_halt_sentinel() {
    // No ENTER: [ps] is still the sentinel pushed by `call`.
    let module = Module::new(vec![konst(-5), op(Opcode::Call), imm(Opcode::Leave, 0)]);
    let host = from_fn(|_: &mut Syscall<'_>| Some(9));
    let mut vm =
        Vm::with_host(&module, VmConfig::default().with_cycle_limit(1000), host).unwrap();

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(9));
    assert_eq!(vm.cycle_count(), 3);
}

#[test]
fn syscall_can_read_and_write_vm_memory() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 8),
        konst(0),
        imm(Opcode::Arg, 4),
        konst(6),
        imm(Opcode::Arg, 8),
        konst(-1),
        op(Opcode::Call),
        imm(Opcode::Leave, 8),
    ])
    .with_literals(b"ping\0\0".to_vec())
    .with_bss(16);

    let host = from_fn(|call: &mut Syscall<'_>| {
        let text = call.read_string(call.arg_u32(0), 64).ok()?;
        assert_eq!(text, "ping");
        let n = call.write_string(call.arg_u32(1), "pong", 16).ok()?;
        Some(n as i32)
    });
    let mut vm = Vm::with_host(&module, VmConfig::default(), host).unwrap();

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(4));
    assert_eq!(vm.read_string(6, 16).unwrap(), "pong");
}

#[test]
fn syscall_request_exit_stops_the_run() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 8),
        konst(17),
        imm(Opcode::Arg, 4),
        konst(-7),
        op(Opcode::Call),
        konst(99),
        imm(Opcode::Leave, 8),
    ]);
    let host = from_fn(|call: &mut Syscall<'_>| {
        call.request_exit(call.arg(0));
        None
    });
    let mut vm = Vm::with_host(&module, VmConfig::default(), host).unwrap();
    let top = vm.program_stack();

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::HostExit(17));
    assert_eq!(vm.program_stack(), top);
    assert!(vm.resume().is_err());
}

#[test]
fn syscall_abort_faults() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 8),
        konst(-2),
        op(Opcode::Call),
        imm(Opcode::Leave, 8),
    ]);
    let host = from_fn(|call: &mut Syscall<'_>| {
        call.abort("bad state");
        None
    });
    let mut vm = Vm::with_host(&module, VmConfig::default(), host).unwrap();
    assert_eq!(
        vm.call(0, &[]),
        Err(VmFault::HostAbort {
            at: 2,
            syscall: 2,
            message: "bad state".to_string()
        })
    );
}

#[test]
fn unhandled_syscall_is_not_a_fault() {
    let module = Module::new(vec![
        imm(Opcode::Enter, 8),
        konst(-1234),
        op(Opcode::Call),
        konst(1),
        imm(Opcode::Leave, 8),
    ]);
    let mut vm = Vm::with_host(&module, VmConfig::default(), NoHost).unwrap();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(1));
}

// ============================================================
// Watchdog, breakpoints, reset
// ============================================================

/// Counts a local down from 600 to 0, then returns 42.
fn countdown_module() -> Module {
    Module::new(vec![
        imm(Opcode::Enter, 8), // 0
        imm(Opcode::Local, 4),
        konst(600),
        op(Opcode::Store4),
        imm(Opcode::Local, 4), // 4: loop
        imm(Opcode::Local, 4),
        op(Opcode::Load4),
        konst(1),
        op(Opcode::Sub),
        op(Opcode::Store4),
        imm(Opcode::Local, 4),
        op(Opcode::Load4),
        konst(0),
        op(Opcode::Eq),
        konst(15), // done - loop
        op(Opcode::Muli),
        konst(4),
        op(Opcode::Add),
        op(Opcode::Jump),
        konst(42), // 19: done
        imm(Opcode::Leave, 8),
    ])
}

#[test]
fn watchdog_stops_after_exactly_the_limit() {
    let module = countdown_module();
    let mut vm = Vm::with_config(&module, VmConfig::default().with_cycle_limit(1000)).unwrap();

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::CycleLimit);
    assert_eq!(vm.cycle_count(), 1000);

    vm.reset();
    vm.set_cycle_limit(1_000_000);
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(42));
    assert_eq!(vm.cycle_count(), 4 + 600 * 15 + 2);
}

#[test]
fn watchdog_stops_an_infinite_loop() {
    let module = Module::new(vec![konst(0), op(Opcode::Jump)]);
    let mut vm = Vm::with_config(&module, VmConfig::default().with_cycle_limit(1000)).unwrap();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::CycleLimit);
    assert_eq!(vm.cycle_count(), 1000);
    assert_eq!(vm.instruction_pointer(), 0);
}

#[test]
fn resume_continues_after_the_watchdog() {
    let module = countdown_module();
    let mut vm = Vm::with_config(&module, VmConfig::default().with_cycle_limit(1000)).unwrap();

    let mut exit = vm.call(0, &[]).unwrap();
    let mut resumes = 0;
    while exit == Exit::CycleLimit {
        resumes += 1;
        assert!(resumes < 100, "program never finished");
        exit = vm.resume().unwrap();
    }
    assert_eq!(exit, Exit::Return(42));
    assert_eq!(resumes, 9);
}

#[test]
fn breakpoint_stops_before_dispatch_and_resumes() {
    let module = Module::new(vec![konst(2), konst(3), op(Opcode::Add)]);
    let mut vm = Vm::new(&module).unwrap();
    vm.set_breakpoint(1);

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Breakpoint(1));
    assert_eq!(vm.instruction_pointer(), 1);
    assert_eq!(vm.operands(), &[2]);

    assert_eq!(vm.resume().unwrap(), Exit::Return(5));
    assert_eq!(vm.breakpoint(), Some(1));

    vm.clear_breakpoint();
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(5));
}

#[test]
fn breakpoint_in_a_loop_fires_every_pass() {
    let module = countdown_module();
    let mut vm = Vm::new(&module).unwrap();
    vm.set_breakpoint(19);
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Breakpoint(19));

    vm.set_breakpoint(4);
    assert_eq!(vm.resume().unwrap(), Exit::Return(42));

    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Breakpoint(4));
    assert_eq!(vm.resume().unwrap(), Exit::Breakpoint(4));
}

#[test]
fn resume_without_interrupted_run() {
    let module = Module::new(vec![konst(1)]);
    let mut vm = Vm::new(&module).unwrap();
    assert_eq!(vm.resume(), Err(VmFault::NotResumable));
    vm.call(0, &[]).unwrap();
    assert_eq!(vm.resume(), Err(VmFault::NotResumable));
}

#[test]
fn fault_ends_the_run() {
    let module = Module::new(vec![op(Opcode::Undef)]);
    let mut vm = Vm::with_config(&module, VmConfig::default()).unwrap();
    assert!(vm.call(0, &[]).is_err());
    assert_eq!(vm.resume(), Err(VmFault::NotResumable));
}

#[test]
fn observers_see_every_step() {
    let module = nested_call_module();
    let mut vm = Vm::new(&module).unwrap();
    let log = StackLog::default();
    vm.set_observer(Box::new(log.clone()));
    vm.call(0, &[]).unwrap();

    let steps = log.0.lock().unwrap();
    assert_eq!(steps.len() as u64, vm.cycle_count());
    let ips: Vec<usize> = steps.iter().map(|(ip, _)| *ip).collect();
    assert_eq!(ips, vec![0, 1, 2, 3, 4, 8, 9, 10, 11, 12, 13, 5, 6, 7]);
}

#[test]
fn tracing_observer_runs() {
    let module = nested_call_module();
    let mut vm = Vm::new(&module).unwrap();
    vm.set_observer(Box::new(TracingObserver));
    assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(51));
    vm.clear_observer();
}

#[test]
fn vm_is_send_with_a_send_host() {
    fn assert_send<T: Send>() {}
    assert_send::<Vm<'static, NoHost>>();
    assert_send::<Vm<'static, Recorder>>();
}

// ============================================================
// Properties
// ============================================================

proptest! {
    #[test]
    fn reset_after_new_leaves_an_identical_arena(
        data in proptest::collection::vec(any::<u8>(), 0..64),
        literals in proptest::collection::vec(any::<u8>(), 0..64),
        bss in 0u32..256,
    ) {
        let module = Module::new(vec![konst(1)])
            .with_data(data)
            .with_literals(literals)
            .with_bss(bss);
        let mut vm = Vm::new(&module).unwrap();
        let fresh = vm.memory().clone();
        let ps = vm.program_stack();

        vm.reset();
        prop_assert_eq!(vm.memory(), &fresh);

        vm.memory_mut().write_i32(ps, -1).unwrap();
        vm.call(0, &[1, 2, 3]).unwrap();
        vm.reset();
        prop_assert_eq!(vm.memory(), &fresh);
        prop_assert_eq!(vm.program_stack(), ps);
        prop_assert_eq!(vm.instruction_pointer(), 0);
        prop_assert_eq!(vm.cycle_count(), 0);
        prop_assert!(vm.operands().is_empty());
    }

    #[test]
    fn enter_leave_balances_the_program_stack(slots in 0i32..1000) {
        let n = slots * 4;
        let module = Module::new(vec![
            imm(Opcode::Enter, 8), // 0
            konst(4),
            op(Opcode::Call),      // 2
            imm(Opcode::Leave, 8), // 3
            imm(Opcode::Enter, n), // 4
            imm(Opcode::Leave, n),
        ]);
        let mut vm = Vm::new(&module).unwrap();
        let log = StackLog::default();
        vm.set_observer(Box::new(log.clone()));
        let top = vm.program_stack();

        prop_assert_eq!(vm.call(0, &[]).unwrap(), Exit::Return(0));
        prop_assert_eq!(vm.program_stack(), top);

        let steps = log.0.lock().unwrap();
        let ps_at = |ip: usize| steps.iter().find(|(i, _)| *i == ip).map(|(_, ps)| *ps);
        prop_assert_eq!(ps_at(2), ps_at(3));
        prop_assert_eq!(ps_at(5).map(|ps| ps + n as u32), ps_at(4));
    }

    #[test]
    fn out_of_bounds_store_writes_nothing(offset in 0u32..16, value in any::<i32>()) {
        let module = Module::new(vec![
            konst(0),
            op(Opcode::Load4),
            konst(value & 0xFF),
            op(Opcode::Store4),
        ]);
        let mut vm = Vm::with_config(&module, VmConfig::default().with_stack_reserve(256)).unwrap();
        let size = vm.memory().size();
        // LOAD4 picks the target address up from word 0.
        let address = size - 3 + offset;
        vm.memory_mut().write_i32(0, address as i32).unwrap();
        let before = vm.memory().clone();

        let err = vm.call(0, &[]).unwrap_err();
        let is_store_fault = matches!(err, VmFault::OutOfBounds { at: 3, opcode: "STORE4", .. });
        prop_assert!(is_store_fault);
        prop_assert_eq!(vm.memory(), &before);
    }

    #[test]
    fn bit_patterns_survive_memory_exactly(bits in any::<i32>()) {
        let module = Module::new(vec![
            konst(4),
            konst(0),
            op(Opcode::Load4),
            op(Opcode::Store4),
            konst(4),
            op(Opcode::Load4),
        ])
        .with_data(words(&[bits]))
        .with_bss(4);
        prop_assert_eq!(eval_module(&module), bits);
    }

    #[test]
    fn cvif_cvfi_round_trips_small_integers(value in IMMEDIATE_MIN..=IMMEDIATE_MAX) {
        prop_assert_eq!(eval(vec![konst(value), op(Opcode::Cvif), op(Opcode::Cvfi)]), value);
    }

    #[test]
    fn cvif_cvfi_round_trips_up_to_two_to_the_24(value in -(1i32 << 24)..=(1i32 << 24)) {
        let module = Module::new(vec![
            konst(0),
            op(Opcode::Load4),
            op(Opcode::Cvif),
            op(Opcode::Cvfi),
        ])
        .with_data(words(&[value]));
        prop_assert_eq!(eval_module(&module), value);
    }
}
