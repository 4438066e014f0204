//! User stack tests
//!
//! Inspect the stack a successful exec leaves behind, reading it back
//! through the process's address space the way user code would see it.

mod common;

use common::{simple_elf, TestKernel};
use exec_loader::{
    config::{MAXARG, PAGE_SIZE, STACK_SENTINEL},
    Process,
};

fn exec(k: &TestKernel, args: &[&str]) -> Process {
    let mut init = k.init_process();
    k.install("/prog", simple_elf());
    k.loader().load_image(&mut init, "/prog", args).unwrap();
    init
}

/// Decode the stack at `sp` into argc and the argument strings
fn read_args(k: &TestKernel, process: &Process, sp: u32) -> (u32, Vec<String>) {
    let argc = k.read_word(process, sp + 4);
    let argv = k.read_word(process, sp + 8);
    let args = (0..argc)
        .map(|i| {
            let ptr = k.read_word(process, argv + 4 * i);
            k.read_cstr(process, ptr)
        })
        .collect();
    assert_eq!(k.read_word(process, argv + 4 * argc), 0, "argv terminator");
    (argc, args)
}

#[test]
fn test_arguments_round_trip() {
    let k = TestKernel::boot();
    let process = exec(&k, &["a", "bb"]);
    let sp = process.trap_frame.esp;

    assert_eq!(k.read_word(&process, sp), STACK_SENTINEL);
    let (argc, args) = read_args(&k, &process, sp);
    assert_eq!(argc, 2);
    assert_eq!(args, ["a", "bb"]);
}

#[test]
fn test_two_argument_addresses() {
    let k = TestKernel::boot();
    let process = exec(&k, &["a", "bb"]);

    // Stack page is 0x3000..0x4000.
    assert_eq!(process.size, 0x4000);
    assert_eq!(k.read_cstr(&process, 0x3FFC), "a");
    assert_eq!(k.read_cstr(&process, 0x3FF8), "bb");
    assert_eq!(k.read_word(&process, 0x3FEC), 0x3FFC);
    assert_eq!(k.read_word(&process, 0x3FF0), 0x3FF8);
    assert_eq!(k.read_word(&process, 0x3FF4), 0);
    assert_eq!(process.trap_frame.esp, 0x3FE0);
}

#[test]
fn test_no_arguments() {
    let k = TestKernel::boot();
    let process = exec(&k, &[]);
    let sp = process.trap_frame.esp;

    assert_eq!(sp, process.size - 16);
    let (argc, args) = read_args(&k, &process, sp);
    assert_eq!(argc, 0);
    assert!(args.is_empty());
}

#[test]
fn test_maximum_arguments() {
    let k = TestKernel::boot();
    let owned: Vec<String> = (0..MAXARG).map(|i| format!("arg{}", i)).collect();
    let args: Vec<&str> = owned.iter().map(String::as_str).collect();
    let process = exec(&k, &args);

    let (argc, read) = read_args(&k, &process, process.trap_frame.esp);
    assert_eq!(argc as usize, MAXARG);
    assert_eq!(read, owned);
}

#[test]
fn test_strings_word_aligned() {
    let k = TestKernel::boot();
    let process = exec(&k, &["x", "odd-length", "four", ""]);
    let sp = process.trap_frame.esp;
    let argv = k.read_word(&process, sp + 8);

    for i in 0..4 {
        assert_eq!(k.read_word(&process, argv + 4 * i) % 4, 0);
    }
    let (_, args) = read_args(&k, &process, sp);
    assert_eq!(args, ["x", "odd-length", "four", ""]);
}

#[test]
fn test_interior_nul_ends_argument() {
    let k = TestKernel::boot();
    let process = exec(&k, &["a\0b", "c"]);
    let sp = process.trap_frame.esp;

    let (argc, args) = read_args(&k, &process, sp);
    assert_eq!(argc, 2);
    assert_eq!(args, ["a", "c"]);
    // The bytes after the NUL are still on the stack.
    let argv0 = k.read_word(&process, k.read_word(&process, sp + 8));
    assert_eq!(k.read_user(&process, argv0, 4), b"a\0b\0");
}

#[test]
fn test_stack_within_one_page() {
    let k = TestKernel::boot();
    let long = "q".repeat(1000);
    let process = exec(&k, &[long.as_str(), long.as_str(), "tail"]);
    let sp = process.trap_frame.esp;

    assert!(sp >= process.size - PAGE_SIZE);
    assert!(sp < process.size);
    let (_, args) = read_args(&k, &process, sp);
    assert_eq!(args[0], long);
    assert_eq!(args[2], "tail");
}

#[test]
fn test_guard_page_inaccessible() {
    let k = TestKernel::boot();
    let process = exec(&k, &["a"]);
    let guard = process.size - 2 * PAGE_SIZE;

    assert_eq!(k.backing_frame(&process, guard), None);
    assert!(k.backing_frame(&process, guard + PAGE_SIZE).is_some());
    // Still mapped for the kernel.
    let slot = process
        .address_space()
        .lookup(&k.pool, guard)
        .expect("guard page table");
    assert!(slot.get(&k.pool).is_present());
}
