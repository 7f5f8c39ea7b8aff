//! Interactive yes/no confirmation for irreversible operations.

use std::io::{self, BufRead, Write};

/// Ask `question` until the answer is `yes` or `no`.
///
/// Blocks until a recognized answer arrives. End of input counts as `no`.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<bool> {
    loop {
        write!(output, "{} [yes/no]: ", question)?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }

        match answer.trim().to_lowercase().as_str() {
            "yes" => return Ok(true),
            "no" | "n" => return Ok(false),
            _ => writeln!(output, "Please type 'yes' or 'no'.")?,
        }
    }
}

/// Confirmation against the terminal
pub fn confirm_stdin(question: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    confirm(&mut input, &mut io::stdout(), question)
}
