use super::*;
use crate::test_support::FakeInstall;
use std::time::{Duration, Instant};

fn run(install: &FakeInstall, files: &[(&str, &str)], body: &str) -> (Outcome, String) {
    run_with(install, files, body, CancelToken::default())
}

fn run_with(
    install: &FakeInstall,
    files: &[(&str, &str)],
    body: &str,
    cancel: CancelToken,
) -> (Outcome, String) {
    let sandbox = install.sandbox(files);
    let table = CommandTable::new(install.subject());
    let mut ctx = ExecutionContext::new("demo", &sandbox, cancel);
    let outcome = execute(body, &mut ctx, &table);
    (outcome, ctx.into_log())
}

#[test]
fn lone_skip_is_skipped_with_reason() {
    let install = FakeInstall::new();
    let (outcome, log) = run(&install, &[], "skip flaky-on-ci\ncmp missing other\n");
    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: "flaky-on-ci".to_string()
        }
    );
    assert!(!log.contains("> cmp"), "{log}");
}

#[test]
fn comments_only_script_passes() {
    let install = FakeInstall::new();
    let (outcome, log) = run(&install, &[], "# nothing to do\n\n");
    assert_eq!(outcome, Outcome::Passed);
    assert!(log.is_empty());
}

#[test]
fn cmp_identical_and_differing_files() {
    let install = FakeInstall::new();
    let files = [("a.txt", "same\n"), ("b.txt", "same\n"), ("c.txt", "other\n")];
    let (outcome, _) = run(&install, &files, "cmp a.txt a.txt\ncompare-files a.txt b.txt\n");
    assert_eq!(outcome, Outcome::Passed);

    let (outcome, log) = run(&install, &files, "cmp a.txt c.txt\nskip never\n");
    assert_eq!(
        outcome,
        Outcome::failed("demo:1: cmp: files a.txt and c.txt differ")
    );
    assert!(!log.contains("> skip"), "{log}");
}

#[test]
fn cmp_reports_unreadable_file() {
    let install = FakeInstall::new();
    let (outcome, _) = run(&install, &[("a.txt", "x")], "cmp a.txt nope.txt\n");
    let Outcome::Failed { diagnostic } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(diagnostic.starts_with("demo:1: cmp: reading nope.txt: "), "{diagnostic}");
}

#[test]
fn usage_errors_name_the_usage() {
    let install = FakeInstall::new();
    let (outcome, _) = run(&install, &[], "cmp only-one\n");
    assert_eq!(
        outcome,
        Outcome::failed("demo:1: cmp: expected 2 files, got 1; usage: cmp file1 file2")
    );
}

#[test]
fn unknown_verb_stops_execution() {
    let install = FakeInstall::new();
    let (outcome, log) = run(&install, &[], "\nfrob x\nskip later\n");
    assert_eq!(outcome, Outcome::failed("demo:2: frob: unknown command \"frob\""));
    assert!(log.contains("FAIL: demo:2: frob"), "{log}");
}

#[test]
fn quoting_error_fails_before_any_line_runs() {
    let install = FakeInstall::new();
    let (outcome, log) = run(&install, &[], "skip first\ncmp 'open\n");
    assert!(
        matches!(&outcome, Outcome::Failed { diagnostic } if diagnostic.starts_with("demo:2: ")),
        "{outcome:?}"
    );
    assert!(log.is_empty());
}

#[test]
fn pcap_passes_and_logs_subject_output() {
    let install = FakeInstall::new();
    let (outcome, log) = run(
        &install,
        &[("cfg.lua", "ips = {}\n"), ("capture.pcap", "pcap")],
        "pcap capture.pcap\n",
    );
    assert_eq!(outcome, Outcome::Passed, "{log}");
    assert!(log.starts_with("> pcap capture.pcap\n[stdout]\n"), "{log}");
    assert!(log.contains("arg: --plugin-path\n"), "{log}");
    assert!(log.contains("arg: capture.pcap\n"), "{log}");
    assert!(log.contains("[stderr]\npreload: none\n"), "{log}");
}

#[test]
fn expect_fail_judges_exit_status_only() {
    let install = FakeInstall::new();
    let files = [("capture.pcap", "pcap")];

    let (outcome, _) = run(&install, &files, "pcap -expect-fail capture.pcap\n");
    assert_eq!(
        outcome,
        Outcome::failed("demo:1: pcap: expected failure did not occur")
    );

    let (outcome, _) = run(
        &install,
        &files,
        "env SUBJECT_EXIT=3\ninvoke-subject --expect-fail capture.pcap\n",
    );
    assert_eq!(outcome, Outcome::Passed);

    let (outcome, _) = run(&install, &files, "env SUBJECT_EXIT=3\npcap capture.pcap\n");
    assert_eq!(outcome, Outcome::failed("demo:2: pcap: subject exited with 3"));
}

#[test]
fn variables_expand_in_arguments() {
    let install = FakeInstall::new();
    let (outcome, log) = run(
        &install,
        &[("a.txt", "x")],
        "env COPY=a.txt\ncmp $WORK/a.txt ${COPY}\n",
    );
    assert_eq!(outcome, Outcome::Passed, "{log}");
}

#[test]
fn env_without_arguments_lists_into_log() {
    let install = FakeInstall::new();
    let (outcome, log) = run(&install, &[], "env\n");
    assert_eq!(outcome, Outcome::Passed);
    assert!(log.contains("\nWORK="), "{log}");
    assert!(log.contains("\nmoddir="), "{log}");

    let (outcome, _) = run(&install, &[], "env NOEQUALS\n");
    assert!(outcome.is_failed());
}

#[test]
fn cd_stays_inside_the_sandbox() {
    let install = FakeInstall::new();
    let files = [("sub/a.txt", "x"), ("a.txt", "x")];
    let (outcome, log) = run(&install, &files, "cd sub\ncmp a.txt ../a.txt\n");
    assert_eq!(outcome, Outcome::Passed, "{log}");

    let (outcome, _) = run(&install, &files, "cd ..\n");
    assert!(
        matches!(&outcome, Outcome::Failed { diagnostic } if diagnostic.contains("outside the sandbox")),
        "{outcome:?}"
    );
    let (outcome, _) = run(&install, &files, "cd a.txt\n");
    assert!(outcome.is_failed());
}

#[test]
fn timeout_cancels_a_running_subject() {
    let install = FakeInstall::new();
    let started = Instant::now();
    let (outcome, _) = run_with(
        &install,
        &[("capture.pcap", "pcap")],
        "env SUBJECT_SLEEP=30\npcap capture.pcap\nskip unreachable\n",
        CancelToken::with_timeout(Duration::from_millis(300)),
    );
    assert_eq!(outcome, Outcome::failed("cancelled"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancelled_token_stops_before_first_line() {
    let install = FakeInstall::new();
    let cancel = CancelToken::default();
    cancel.cancel();
    let (outcome, log) = run_with(&install, &[], "skip never\n", cancel);
    assert_eq!(outcome, Outcome::failed("cancelled"));
    assert!(log.is_empty());
}

#[test]
fn same_archive_twice_gives_same_outcome() {
    let install = FakeInstall::new();
    let files = [("a.txt", "1"), ("b.txt", "2")];
    let first = run(&install, &files, "cmp a.txt b.txt\n").0;
    let second = run(&install, &files, "cmp a.txt b.txt\n").0;
    assert_eq!(first, second);
}
