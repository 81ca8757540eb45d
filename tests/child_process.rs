#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use buildorch::errors::BuildError;
use buildorch::exec::{ArgFlags, ChildProcess, PairStyle, StreamMode, TextEncoding};
use common::{LogCapture, init_tracing, wait_for, with_timeout};
use regex::Regex;
use tracing::Level;

fn sh(line: &str) -> ChildProcess {
    ChildProcess::shell(line).poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn captures_complete_lines_and_exit_code() {
    init_tracing();
    let p = sh("printf 'line1\\nline2\\n'").stdout(StreamMode::Capture);
    p.run().unwrap();
    let code = with_timeout(p.join()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(p.exit_code(), Some(0));
    assert_eq!(p.captured_stdout(), "line1\nline2");
}

#[tokio::test]
async fn trailing_partial_line_is_flushed_at_exit() {
    let p = sh("printf 'first\\npartial'").stdout(StreamMode::Capture);
    p.run().unwrap();
    with_timeout(p.join()).await.unwrap();
    assert_eq!(p.captured_stdout(), "first\npartial");
}

#[tokio::test]
async fn utf16_output_is_decoded() {
    // "hi\n" in UTF-16LE.
    let p = sh("printf 'h\\000i\\000\\n\\000'")
        .stdout(StreamMode::Capture)
        .encoding(TextEncoding::Utf16);
    p.run().unwrap();
    with_timeout(p.join()).await.unwrap();
    assert_eq!(p.captured_stdout(), "hi");
}

#[tokio::test]
async fn failure_carries_stderr_and_exit_code() {
    let p = sh("echo 'broken thing' >&2; exit 4");
    p.run().unwrap();
    let err = with_timeout(p.join()).await.unwrap_err();

    match err {
        BuildError::ToolFailed {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, Some(4));
            assert_eq!(stderr, "broken thing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn extra_success_codes_and_allowed_failure() {
    let p = sh("exit 1").success_codes([0, 1]);
    p.run().unwrap();
    assert_eq!(with_timeout(p.join()).await.unwrap(), 1);

    let p = sh("exit 7").allow_failure(true);
    p.run().unwrap();
    assert_eq!(with_timeout(p.join()).await.unwrap(), 7);
}

#[tokio::test]
async fn error_pattern_does_not_fail_a_successful_run() {
    let p = sh("echo 'error: something odd'").error_pattern(Regex::new("^error:").unwrap());
    p.run().unwrap();
    assert_eq!(with_timeout(p.join()).await.unwrap(), 0);
}

#[tokio::test]
async fn stdin_data_reaches_the_child() {
    let p = ChildProcess::new("cat")
        .stdin_data("alpha\nbeta\n")
        .stdout(StreamMode::Capture)
        .poll_interval(Duration::from_millis(5));
    p.run().unwrap();
    with_timeout(p.join()).await.unwrap();
    assert_eq!(p.captured_stdout(), "alpha\nbeta");
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let p = sh("true");
    p.run().unwrap();
    assert!(matches!(p.run(), Err(BuildError::ConfigError(_))));
    with_timeout(p.join()).await.unwrap();
}

#[tokio::test]
async fn interrupt_stops_a_sleeping_child_gracefully() {
    let p = Arc::new(
        ChildProcess::new("sleep")
            .arg("30")
            .poll_interval(Duration::from_millis(5)),
    );
    p.run().unwrap();

    let joiner = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.join().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    p.interrupt();
    let err = with_timeout(joiner).await.unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn terminate_on_interrupt_kills_a_child_ignoring_sigint() {
    let p = Arc::new(
        sh("trap '' INT; sleep 30; sleep 30").terminate_on_interrupt(true),
    );
    p.run().unwrap();

    let joiner = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.join().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    p.interrupt();
    let err = with_timeout(joiner).await.unwrap().unwrap_err();
    assert!(err.is_interrupted());
}

#[tokio::test]
async fn second_interrupt_escalates_to_kill() {
    let p = Arc::new(sh("trap '' INT; sleep 30; sleep 30"));
    p.run().unwrap();

    let joiner = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.join().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    p.interrupt();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!joiner.is_finished(), "SIGINT is ignored by the child");

    p.interrupt();
    let err = with_timeout(joiner).await.unwrap().unwrap_err();
    assert!(err.is_interrupted());
}

#[tokio::test]
async fn interrupted_before_start_never_spawns() {
    let p = sh("touch should-not-exist");
    p.interrupt();
    assert!(p.run().unwrap_err().is_interrupted());
}

#[tokio::test]
async fn forwarded_lines_are_logged_in_order() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let p = sh("printf 'line1\\nline2\\n'").stdout(StreamMode::Forward(Level::INFO));
    p.run().unwrap();
    assert_eq!(with_timeout(p.join()).await.unwrap(), 0);

    assert_eq!(logs.stream_lines("stdout"), vec!["line1", "line2"]);
    assert!(
        logs.events()
            .iter()
            .filter(|e| e.stream.is_some())
            .all(|e| e.level == Level::INFO)
    );
}

#[tokio::test]
async fn partial_line_is_held_until_the_process_exits() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let p = Arc::new(sh("printf partial; sleep 0.3").stdout(StreamMode::Forward(Level::INFO)));
    p.run().unwrap();
    let joiner = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.join().await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!joiner.is_finished());
    assert!(logs.stream_lines("stdout").is_empty());

    with_timeout(joiner).await.unwrap().unwrap();
    assert_eq!(logs.stream_lines("stdout"), vec!["partial"]);
}

/// Alive and not a zombie waiting to be reaped.
fn is_running(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only probes for existence.
    if unsafe { libc::kill(pid, 0) } == -1 {
        return std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH);
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => !cfg!(target_os = "linux"),
    }
}

#[tokio::test]
async fn interrupt_leaves_no_process_of_the_group_behind() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    // Background jobs of a non-interactive shell ignore SIGINT.
    let p = Arc::new(sh("sleep 30 & echo $! > pid; wait").cwd(dir.path()));
    p.run().unwrap();

    let joiner = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.join().await })
    };
    assert!(
        wait_for(Duration::from_secs(2), || {
            std::fs::read_to_string(&pid_file).is_ok_and(|s| s.ends_with('\n'))
        })
        .await
    );
    let pid: libc::pid_t = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_running(pid));

    p.interrupt();
    let err = with_timeout(joiner).await.unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert!(wait_for(Duration::from_secs(2), || !is_running(pid)).await);
}

#[tokio::test]
async fn secret_arguments_reach_a_shell_command_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("decoy"), "").unwrap();

    let p = ChildProcess::shell("echo")
        .arg_with("hunter2", ArgFlags::secret())
        .arg("*")
        .cwd(dir.path())
        .stdout(StreamMode::Capture)
        .poll_interval(Duration::from_millis(5));
    p.run().unwrap();
    with_timeout(p.join()).await.unwrap();

    assert_eq!(p.captured_stdout(), "hunter2 *");
    assert!(!p.command_line().contains("hunter2"));
}

#[tokio::test]
async fn quoted_pair_reaches_the_program_without_quotes() {
    let p = ChildProcess::new("printf")
        .arg("%s\\n")
        .arg_pair("-DPREFIX", "a b", PairStyle::Equals, ArgFlags::quoted())
        .stdout(StreamMode::Capture)
        .poll_interval(Duration::from_millis(5));
    p.run().unwrap();
    with_timeout(p.join()).await.unwrap();

    assert_eq!(p.captured_stdout(), "-DPREFIX=a b");
}
