use std::io::{self, BufRead, Write};

/// Prints the prompt when on a terminal and blocks for the next line.
/// Returns `None` on end of input. EINTR from signal delivery is retried
/// here, never surfaced; a Ctrl-C typed at the prompt only sets a flag
/// the main loop discards.
pub fn read_line(interactive: bool) -> io::Result<Option<String>> {
    if interactive {
        print!("$ ");
        io::stdout().flush()?;
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                // EOF; a partial line without a newline still counts.
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(line));
            }
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
