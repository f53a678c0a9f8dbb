use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::process::Stdio;

use assert_cmd::Command;
use memfile::MemFile;

const PIPE: &str = env!("CARGO_BIN_EXE_linring-pipe");

/// Enough to wrap a small buffer many times.
fn payload() -> Vec<u8> {
    (0..3 * 1024 * 1024u32)
        .map(|i| (i % 251) as u8 ^ (i >> 12) as u8)
        .collect()
}

fn pipe(args: &[&str], input: &[u8]) -> Vec<u8> {
    let assert = Command::new(PIPE)
        .args(args)
        .write_stdin(input.to_vec())
        .assert()
        .success();
    assert.get_output().stdout.clone()
}

#[test]
fn copies_through_every_buffer_kind() {
    let data = payload();

    for buffer in ["flat", "auto"] {
        let out = pipe(&["--buffer", buffer, "--size", "4096", "--block", "1000"], &data);
        assert!(out == data, "{buffer} buffer corrupted the stream");
    }
}

#[test]
#[cfg(target_os = "linux")]
fn copies_through_the_ring() {
    let data = payload();

    let out = pipe(&["--buffer", "linear", "--size", "4096", "--block", "3000"], &data);
    assert!(out == data, "linear buffer corrupted the stream");

    let out = pipe(&["--buffer", "linear", "--size", "4096", "--split"], &data);
    assert!(out == data, "split ring corrupted the stream");
}

#[test]
fn empty_input() {
    assert!(pipe(&[], b"").is_empty());
}

#[test]
fn files_instead_of_standard_streams() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");

    let data = payload();
    std::fs::write(&input, &data).unwrap();

    Command::new(PIPE)
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .args(["--buffer", "flat", "--size", "65536"])
        .assert()
        .success()
        .stdout("");

    assert!(std::fs::read(&output).unwrap() == data);
}

#[test]
#[cfg(target_os = "linux")]
fn split_reads_from_a_memfd() {
    let data = payload();

    let memfd = MemFile::create_default("input").expect("failed to create memfd");
    let mut file = unsafe { File::from_raw_fd(memfd.into_raw_fd()) };
    file.write_all(&data).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut cmd = std::process::Command::new(PIPE);
    cmd.args(["--split", "--size", "8192", "--block", "100000"]);
    cmd.stdin(Stdio::from(file));

    let assert = assert_cmd::assert::OutputAssertExt::assert(cmd.output().unwrap()).success();
    assert!(assert.get_output().stdout == data);
}

#[test]
fn missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();

    Command::new(PIPE)
        .arg("--input")
        .arg(dir.path().join("does-not-exist"))
        .assert()
        .code(1);
}

#[test]
fn rejects_invalid_arguments() {
    Command::new(PIPE)
        .args(["--block", "0"])
        .write_stdin("unused")
        .assert()
        .code(1);

    Command::new(PIPE)
        .args(["--buffer", "flat", "--split"])
        .write_stdin("unused")
        .assert()
        .code(1);

    Command::new(PIPE)
        .args(["--size", "0"])
        .write_stdin("unused")
        .assert()
        .code(1);
}
