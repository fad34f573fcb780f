//! Optional algebraic-equivalence oracle.
//!
//! A long-running subprocess (typically a Python interpreter with sympy
//! preloaded) receives one comparison script per query and answers `1` or
//! `0` on a line of its own.  The oracle only enlarges cache hits; `false`
//! is always a safe answer, so any failure degrades to "not equivalent".

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::warn;

use super::term::{comparison_script, Term};

pub trait EquivalenceOracle {
    /// Whether the two terms are mathematically equal.
    fn equivalent(&mut self, lhs: &Term, rhs: &Term) -> bool;
}

pub struct SympyProcessOracle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SympyProcessOracle {
    /// Spawn the oracle process.  It must read statements line by line and
    /// print the result of each `print(...)` statement immediately.
    pub fn spawn(program: &str, args: &[&str]) -> std::io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take().expect("oracle stdin is piped");
        let stdout = BufReader::new(child.stdout.take().expect("oracle stdout is piped"));
        Ok(SympyProcessOracle {
            child,
            stdin,
            stdout,
        })
    }
}

impl EquivalenceOracle for SympyProcessOracle {
    fn equivalent(&mut self, lhs: &Term, rhs: &Term) -> bool {
        if lhs == rhs {
            return true;
        }
        let script = comparison_script(lhs, rhs);
        if let Err(err) = self
            .stdin
            .write_all(script.as_bytes())
            .and_then(|()| self.stdin.flush())
        {
            warn!(%err, "equivalence oracle went away");
            return false;
        }
        let mut line = String::new();
        match self.stdout.read_line(&mut line) {
            Ok(_) => line.trim() == "1",
            Err(err) => {
                warn!(%err, "equivalence oracle gave no answer");
                false
            }
        }
    }
}

impl Drop for SympyProcessOracle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
