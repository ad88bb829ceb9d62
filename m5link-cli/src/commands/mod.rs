//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod files;
pub(crate) mod monitor;
pub(crate) mod ports;

use anyhow::{Context, Result};
use console::style;
use log::debug;
use m5link::{Connection, Console, ConsoleEvent, NativePort, SerialConfig, clean_console_text};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::{Cli, get_baud, get_port};

/// An open connection plus the thread printing its console output.
pub(crate) struct Session {
    conn: Connection<NativePort>,
    printer: JoinHandle<()>,
}

impl Session {
    /// Select a port, open it, and route console events to `print`.
    pub(crate) fn open<F>(cli: &Cli, config: &mut Config, print: F) -> Result<Self>
    where
        F: FnMut(ConsoleEvent) + Send + 'static,
    {
        let port_name = get_port(cli, config)?;
        let baud = get_baud(cli, config);

        if !cli.quiet {
            eprintln!(
                "{} Connecting to {} at {baud} baud",
                style("→").cyan(),
                style(&port_name).green()
            );
        }

        let (console, events) = Console::channel();
        let conn = Connection::open(
            &SerialConfig::new(&port_name, baud),
            console,
            config.link_options(),
        )
        .with_context(|| format!("Failed to open port {port_name}"))?;

        Ok(Self {
            conn,
            printer: spawn_printer(events, print),
        })
    }

    pub(crate) fn conn(&self) -> &Connection<NativePort> {
        &self.conn
    }

    /// Close the port and wait for pending console output to be printed.
    pub(crate) fn finish(self) -> Result<()> {
        let Self { conn, printer } = self;
        let closed = conn.close();
        // The printer ends once every Console handle is gone
        drop(conn);
        if printer.join().is_err() {
            debug!("Console printer thread panicked");
        }
        closed.context("Failed to close port")
    }
}

fn spawn_printer<F>(events: Receiver<ConsoleEvent>, mut print: F) -> JoinHandle<()>
where
    F: FnMut(ConsoleEvent) + Send + 'static,
{
    thread::spawn(move || {
        for event in events {
            print(event);
        }
    })
}

/// Console printer used by one-shot commands.
///
/// A terminal gets the device text unchanged. Redirected output is stripped
/// of control characters so logs stay readable.
pub(crate) fn print_to_stdout(event: ConsoleEvent) {
    use std::io::{IsTerminal as _, Write as _};

    if let ConsoleEvent::Output(text) = event {
        let mut stdout = std::io::stdout().lock();
        let text = stdout_text(text, stdout.is_terminal());
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

fn stdout_text(text: String, is_terminal: bool) -> String {
    if is_terminal {
        text
    } else {
        clean_console_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_text_keeps_terminal_output_raw() {
        let text = "\x1b[32mok\x1b[0m\r\n".to_string();
        assert_eq!(stdout_text(text.clone(), true), text);
    }

    #[test]
    fn test_stdout_text_cleans_redirected_output() {
        assert_eq!(
            stdout_text("Traceback\x07\r\n>>> \x08".to_string(), false),
            "Traceback\n>>> "
        );
    }
}
