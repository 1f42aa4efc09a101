use nix::fcntl::{OFlag, open};
use nix::sys::stat::{Mode, fchmod};
use nix::unistd::close;
use std::os::unix::io::RawFd;
use tracing::debug;
use ysh_types::{YshError, YshResult};

/// Descriptor bindings a stage will exec with. Defaults are 0/1/2;
/// pipe wiring overrides them first, redirections last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBindings {
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub stderr: RawFd,
}

impl IoBindings {
    pub fn standard() -> Self {
        IoBindings {
            stdin: libc::STDIN_FILENO,
            stdout: libc::STDOUT_FILENO,
            stderr: libc::STDERR_FILENO,
        }
    }
}

/// Result of resolving a stage's redirection directives: the final fd
/// bindings plus the number of leading argv entries the program may see
/// (argv is truncated at the first redirection token).
#[derive(Debug)]
pub struct ResolvedIo {
    pub bindings: IoBindings,
    pub visible_argc: usize,
}

const CREATE_MODE: Mode = Mode::from_bits_truncate(0o644);

fn open_output(path: &str) -> YshResult<RawFd> {
    let fd = open(
        path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        CREATE_MODE,
    )
    .map_err(|e| YshError::Redirect(path.to_string(), e))?;
    // Force the bits past the umask.
    fchmod(fd, CREATE_MODE).map_err(|e| YshError::Redirect(path.to_string(), e))?;
    Ok(fd)
}

/// Interprets the redirection tokens embedded in a stage's argv, left to
/// right, mutating the fd bindings as each directive is seen. Runs in the
/// child immediately before exec (redirections may override pipe bindings
/// established moments earlier), but carries no process state of its own
/// so it is testable without a fork.
pub fn resolve_redirects(argv: &[String], io: IoBindings) -> YshResult<ResolvedIo> {
    let mut io = io;
    let mut visible_argc = argv.len();
    let mut opened: Vec<RawFd> = Vec::new();

    let fail = |opened: &[RawFd], err: YshError| -> YshResult<ResolvedIo> {
        for fd in opened {
            let _ = close(*fd);
        }
        Err(err)
    };

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            ">" => {
                let Some(path) = argv.get(i + 1) else {
                    return fail(&opened, YshError::Syntax);
                };
                let fd = match open_output(path) {
                    Ok(fd) => fd,
                    Err(e) => return fail(&opened, e),
                };
                opened.push(fd);
                debug!("redirect stdout -> {} (fd {})", path, fd);
                // stderr follows when it currently aliases stdout
                if io.stderr == io.stdout {
                    io.stderr = fd;
                }
                io.stdout = fd;
                visible_argc = visible_argc.min(i);
                i += 2;
            }
            "2>" => {
                let Some(path) = argv.get(i + 1) else {
                    return fail(&opened, YshError::Syntax);
                };
                let fd = match open_output(path) {
                    Ok(fd) => fd,
                    Err(e) => return fail(&opened, e),
                };
                opened.push(fd);
                debug!("redirect stderr -> {} (fd {})", path, fd);
                io.stderr = fd;
                visible_argc = visible_argc.min(i);
                i += 2;
            }
            "<" => {
                let Some(path) = argv.get(i + 1) else {
                    return fail(&opened, YshError::Syntax);
                };
                let fd = match open(path.as_str(), OFlag::O_RDWR, Mode::empty()) {
                    Ok(fd) => fd,
                    Err(e) => return fail(&opened, YshError::Redirect(path.clone(), e)),
                };
                opened.push(fd);
                debug!("redirect stdin <- {} (fd {})", path, fd);
                io.stdin = fd;
                visible_argc = visible_argc.min(i);
                i += 2;
            }
            "2>&1" => {
                debug!("redirect stderr -> current stdout (fd {})", io.stdout);
                io.stderr = io.stdout;
                visible_argc = visible_argc.min(i);
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(ResolvedIo {
        bindings: io,
        visible_argc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn close_all(io: &IoBindings) {
        for fd in [io.stdin, io.stdout, io.stderr] {
            if fd > 2 {
                let _ = close(fd);
            }
        }
    }

    #[test]
    fn no_redirects_leaves_bindings_alone() {
        let resolved =
            resolve_redirects(&argv(&["ls", "-l", "/tmp"]), IoBindings::standard()).unwrap();
        assert_eq!(resolved.bindings, IoBindings::standard());
        assert_eq!(resolved.visible_argc, 3);
    }

    #[test]
    fn stdout_redirect_creates_file_with_0644() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path_str = path.to_string_lossy().into_owned();

        let resolved = resolve_redirects(
            &argv(&["printf", "hi", ">", &path_str]),
            IoBindings::standard(),
        )
        .unwrap();
        assert_eq!(resolved.visible_argc, 2, "program must not see '>' or the filename");
        assert_ne!(resolved.bindings.stdout, libc::STDOUT_FILENO);
        assert_eq!(resolved.bindings.stderr, libc::STDERR_FILENO);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        close_all(&resolved.bindings);
    }

    #[test]
    fn stderr_redirect_only_moves_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.txt");
        let path_str = path.to_string_lossy().into_owned();

        let resolved = resolve_redirects(
            &argv(&["ls", "nope", "2>", &path_str]),
            IoBindings::standard(),
        )
        .unwrap();
        assert_eq!(resolved.bindings.stdout, libc::STDOUT_FILENO);
        assert_ne!(resolved.bindings.stderr, libc::STDERR_FILENO);
        assert_eq!(resolved.visible_argc, 2);
        assert!(path.exists());
        close_all(&resolved.bindings);
    }

    #[test]
    fn missing_input_file_is_a_named_error() {
        let err = resolve_redirects(
            &argv(&["cat", "<", "/definitely/not/here"]),
            IoBindings::standard(),
        )
        .unwrap_err();
        match err {
            YshError::Redirect(path, _) => assert_eq!(path, "/definitely/not/here"),
            other => panic!("expected Redirect error, got {other:?}"),
        }
    }

    #[test]
    fn input_redirect_binds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "data").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let resolved =
            resolve_redirects(&argv(&["cat", "<", &path_str]), IoBindings::standard()).unwrap();
        assert_ne!(resolved.bindings.stdin, libc::STDIN_FILENO);
        assert_eq!(resolved.visible_argc, 1);
        close_all(&resolved.bindings);
    }

    #[test]
    fn dup_stderr_to_stdout_then_redirect_moves_both() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("both.txt");
        let path_str = path.to_string_lossy().into_owned();

        // 2>&1 first: stderr aliases stdout. A later > must carry both.
        let resolved = resolve_redirects(
            &argv(&["make", "2>&1", ">", &path_str]),
            IoBindings::standard(),
        )
        .unwrap();
        assert_eq!(resolved.bindings.stderr, resolved.bindings.stdout);
        assert_ne!(resolved.bindings.stdout, libc::STDOUT_FILENO);
        assert_eq!(resolved.visible_argc, 1);
        close_all(&resolved.bindings);
    }

    #[test]
    fn dup_stderr_alone_aliases_current_stdout() {
        // With stdout already bound to a pipe fd, 2>&1 must follow the pipe.
        let io = IoBindings {
            stdin: libc::STDIN_FILENO,
            stdout: 42,
            stderr: libc::STDERR_FILENO,
        };
        let resolved = resolve_redirects(&argv(&["cmd", "2>&1"]), io).unwrap();
        assert_eq!(resolved.bindings.stderr, 42);
        assert_eq!(resolved.visible_argc, 1);
    }

    #[test]
    fn missing_operand_is_a_syntax_error() {
        for tokens in [&["cat", ">"][..], &["cat", "2>"][..], &["cat", "<"][..]] {
            let err = resolve_redirects(&argv(tokens), IoBindings::standard()).unwrap_err();
            assert!(matches!(err, YshError::Syntax), "tokens {tokens:?}");
        }
    }
}
