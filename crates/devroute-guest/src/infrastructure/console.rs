//! Line-oriented console for the guest binary.
//!
//! Reads one command per line and drives a [`GuestHandle`]:
//!
//! ```text
//! list                   show every device
//! select <device> <vm>   ask the host to move a device
//! clear <device>         clear a device's selection (nothing is sent)
//! save                   write mounts back (test-file mode only)
//! help                   show this text
//! ```
//!
//! Stdin is read on a dedicated OS thread: a blocking read inside the tokio
//! runtime would keep the runtime from shutting down after Ctrl+C.

use std::io::BufRead;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::events::GuestEvent;
use crate::application::registry::DeviceRecord;
use crate::application::routing::{ChangeOutcome, RequestRejected};
use crate::application::service::GuestHandle;

pub const HELP: &str = "\
commands:
  list                   show every device
  select <device> <vm>   ask the host to move a device
  clear <device>         clear a device's selection
  save                   write mounts back (test-file mode only)
  help                   show this text";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Select { device_id: String, target_vm: String },
    Clear { device_id: String },
    Save,
    Help,
}

/// Parses one line.  Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb, args.as_slice()) {
        ("list" | "ls", []) => ConsoleCommand::List,
        ("select", [device, vm]) => ConsoleCommand::Select {
            device_id: (*device).to_string(),
            target_vm: (*vm).to_string(),
        },
        ("clear", [device]) => ConsoleCommand::Clear {
            device_id: (*device).to_string(),
        },
        ("save", []) => ConsoleCommand::Save,
        ("help" | "?", []) => ConsoleCommand::Help,
        ("select", _) => return Err("usage: select <device> <vm>".to_string()),
        ("clear", _) => return Err("usage: clear <device>".to_string()),
        (other, _) => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

/// One listing line for a device.
pub fn format_device(id: &str, record: &DeviceRecord) -> String {
    let words: Vec<&str> = [record.vendor.as_str(), record.product.as_str()]
        .into_iter()
        .filter(|w| !w.is_empty())
        .collect();
    let name = if words.is_empty() {
        String::new()
    } else {
        format!(" ({})", words.join(" "))
    };
    format!(
        "{id}{name}: selected={} connected={} targets=[{}]",
        record.selected.as_deref().unwrap_or("-"),
        record.connected_to.as_deref().unwrap_or("-"),
        record.targets.join(", ")
    )
}

/// Writes a [`GuestEvent`] to the log.
pub fn log_event(event: &GuestEvent) {
    match event {
        GuestEvent::DeviceAdded { id, record } => info!("device added: {}", format_device(id, record)),
        GuestEvent::DeviceUpdated { id, record } => {
            debug!("device updated: {}", format_device(id, record))
        }
        GuestEvent::DeviceRemoved { id } => info!("device removed: {id}"),
        GuestEvent::ConnectionStateChanged(true) => info!("connected to host"),
        GuestEvent::ConnectionStateChanged(false) => warn!("not connected to host"),
        GuestEvent::RequestResolved {
            request_id,
            device_id,
            ok: true,
            ..
        } => info!("{device_id}: request {request_id} approved"),
        GuestEvent::RequestResolved {
            request_id,
            device_id,
            message,
            ..
        } => warn!("{device_id}: request {request_id} failed: {message}"),
    }
}

/// Reads stdin lines on a dedicated thread and forwards them.
///
/// The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Executes console lines until input ends or the service stops.
///
/// # Errors
///
/// Returns the I/O error if writing to `output` fails.
pub async fn run<W>(
    handle: GuestHandle,
    mut lines: mpsc::Receiver<String>,
    mut output: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        let reply = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => match execute(&handle, command).await {
                Some(reply) => reply,
                None => break,
            },
            Err(usage) => usage,
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    debug!("console input closed");
    Ok(())
}

/// Runs one command.  `None` means the service is gone.
async fn execute(handle: &GuestHandle, command: ConsoleCommand) -> Option<String> {
    let reply = match command {
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::List => match handle.devices().await {
            Ok(devices) if devices.is_empty() => "no devices".to_string(),
            Ok(devices) => devices
                .iter()
                .map(|(id, record)| format_device(id, record))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => return None,
        },
        ConsoleCommand::Select {
            device_id,
            target_vm,
        } => match handle.request_change(device_id.as_str(), target_vm.as_str()).await {
            Ok(ChangeOutcome::Requested(request_id)) => format!("request {request_id} issued"),
            Ok(ChangeOutcome::Unchanged) => format!("{device_id} is already on {target_vm}"),
            Ok(ChangeOutcome::Cleared) => format!("{device_id} cleared"),
            Err(RequestRejected::ServiceStopped) => return None,
            Err(e) => format!("rejected: {e}"),
        },
        ConsoleCommand::Clear { device_id } => match handle.clear_selection(device_id.as_str()).await {
            Ok(_) => format!("{device_id} cleared"),
            Err(RequestRejected::ServiceStopped) => return None,
            Err(e) => format!("rejected: {e}"),
        },
        ConsoleCommand::Save => match handle.save().await {
            Ok(count) => format!("saved {count} mount(s)"),
            Err(e) => format!("save failed: {e}"),
        },
    };
    Some(reply)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
