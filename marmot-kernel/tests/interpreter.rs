//! Interpreter behavior, driven through whole-program runs.

mod common;

use common::{assemble, machine, machine_with_input, test_config};
use marmot_abi::{Instruction, Opcode, encode_program};

#[test]
fn arithmetic_and_print() {
    let mut m = machine(test_config(), 2048);
    let image = assemble("6 r1, $5\n2 r1, $3\n11 r1\n27\n");
    m.scheduler.create_process(&image, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["8"]);
}

#[test]
fn compare_loop_increments_three_times() {
    // r2 holds the negative displacement back to the incr; the loop body
    // runs until cmpi clears the sign flag at r1 == 3.
    let source = "\
        6 r1, $0\n\
        6 r2, $-19\n\
        1 r1\n\
        14 r1, $3\n\
        16 r2\n\
        11 r1\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["3"]);
}

#[test]
fn je_taken_on_equal_operands() {
    // Equal compare: zero set, sign clear. The je hops over the first
    // print, so only 77 appears.
    let source = "\
        6 r1, $5\n\
        14 r1, $5\n\
        6 r2, $5\n\
        18 r2\n\
        11 r1\n\
        6 r3, $77\n\
        11 r3\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["77"]);
}

#[test]
fn jlt_taken_on_strictly_less() {
    let source = "\
        6 r1, $2\n\
        14 r1, $5\n\
        6 r2, $5\n\
        16 r2\n\
        11 r1\n\
        6 r3, $77\n\
        11 r3\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["77"]);
}

#[test]
fn jgt_taken_on_strictly_greater_and_on_equal() {
    // jgt tests only the sign flag, so it is taken for greater AND for
    // equal operands.
    for first in [9u32, 5] {
        let source = format!(
            "6 r1, ${first}\n\
             14 r1, $5\n\
             6 r2, $5\n\
             17 r2\n\
             11 r1\n\
             6 r3, $77\n\
             11 r3\n\
             27\n"
        );
        let mut m = machine(test_config(), 2048);
        m.scheduler.create_process(&assemble(&source), 256).unwrap();
        m.scheduler.run();
        assert_eq!(m.output.lines(), vec!["77"], "first operand {first}");
    }
}

#[test]
fn jgt_not_taken_on_strictly_less() {
    let source = "\
        6 r1, $2\n\
        14 r1, $5\n\
        6 r2, $5\n\
        17 r2\n\
        11 r1\n\
        6 r3, $77\n\
        11 r3\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["2", "77"]);
}

#[test]
fn memory_moves_and_stack_round_trip() {
    // Stores 77 into the data segment, reads it back through each of the
    // memory moves, and bounces it through the stack.
    let source = "\
        7 r1, r9\n\
        6 r2, $77\n\
        9 r1, r2\n\
        8 r3, r1\n\
        11 r3\n\
        4 r3\n\
        35 r4\n\
        11 r4\n\
        7 r5, r1\n\
        2 r5, $8\n\
        10 r5, r1\n\
        8 r6, r5\n\
        11 r6\n\
        6 r7, $99\n\
        4 r7\n\
        36 r1\n\
        8 r8, r1\n\
        11 r8\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["77", "77", "77", "99"]);
}

#[test]
fn call_and_ret() {
    // call lands on the movi at offset 20; ret resumes at the printr.
    let source = "\
        6 r1, $6\n\
        19 r1\n\
        11 r2\n\
        27\n\
        6 r2, $55\n\
        21\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["55"]);
}

#[test]
fn callm_reads_its_displacement_from_memory() {
    let source = "\
        7 r1, r9\n\
        6 r2, $6\n\
        9 r1, r2\n\
        20 r1\n\
        11 r3\n\
        27\n\
        6 r3, $66\n\
        21\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["66"]);
}

#[test]
fn sixteen_pushes_fill_the_stack_and_the_next_one_faults() {
    // 64 bytes of stack hold exactly 16 pushes. The 17th crosses the
    // floor: the process terminates and the second marker never prints.
    let mut source = String::new();
    for _ in 0..16 {
        source.push_str("5 $1\n");
    }
    source.push_str("6 r1, $42\n11 r1\n");
    source.push_str("5 $1\n");
    source.push_str("6 r2, $43\n11 r2\n27\n");

    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(&source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["42"]);
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn memory_clear_zeroes_and_is_idempotent() {
    let source = "\
        7 r1, r9\n\
        6 r2, $77\n\
        9 r1, r2\n\
        6 r3, $8\n\
        33 r1, r3\n\
        8 r4, r1\n\
        11 r4\n\
        33 r1, r3\n\
        8 r5, r1\n\
        11 r5\n\
        27\n";
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["0", "0"]);
}

#[test]
fn out_of_range_access_terminates_only_the_offender() {
    // First process reads far outside its address space; the second runs
    // to completion regardless.
    let bad = assemble("6 r1, $4000\n8 r2, r1\n11 r2\n27\n");
    let good = assemble("6 r1, $7\n11 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&bad, 256).unwrap();
    m.scheduler.create_process(&good, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["7"]);
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn illegal_opcode_byte_terminates_the_process() {
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&[99], 256).unwrap();
    m.scheduler.run();
    assert!(m.output.lines().is_empty());
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn out_of_range_register_operand_terminates_the_process() {
    let image = encode_program(&[
        Instruction::binary(Opcode::Movi, 12, 5),
        Instruction::new(Opcode::Exit),
    ]);
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&image, 256).unwrap();
    m.scheduler.run();
    assert!(m.output.lines().is_empty());
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn input_reads_a_u32_from_the_console() {
    let source = "32 r1\n1 r1\n11 r1\n27\n";
    let mut m = machine_with_input(test_config(), 2048, "41\n");
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["42"]);
}

#[test]
fn unparsable_input_yields_zero() {
    let source = "32 r1\n11 r1\n27\n";
    let mut m = machine_with_input(test_config(), 2048, "not a number\n");
    m.scheduler.create_process(&assemble(source), 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["0"]);
}
