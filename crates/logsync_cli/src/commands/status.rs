//! Status command implementation.

use logsync_engine::{Digest, EndpointStatus, FileStatusStorage, StatusStorage};
use serde::Serialize;
use std::path::Path;

/// Printable endpoint status.
#[derive(Debug, Serialize)]
pub struct StatusView {
    /// Status file path.
    pub path: String,
    /// Whether the file exists.
    pub exists: bool,
    /// Registered with the server.
    pub registered: bool,
    /// Attached to a user.
    pub attached_to_user: bool,
    /// Event sequence number.
    pub event_sequence_number: u32,
    /// Endpoint key digest, hex.
    pub endpoint_key_hash: String,
    /// Profile digest, hex.
    pub profile_hash: String,
    /// Access token, if issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Runs the status command.
pub fn run(path: &Path, next_sequence: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = FileStatusStorage::new(path);
    let exists = storage.read()?.is_some();
    let mut status = EndpointStatus::load(&storage)?;

    if next_sequence {
        let number = status.next_event_sequence_number()?;
        status.save(&storage)?;
        println!("Reserved event sequence number {number}");
    }

    let view = StatusView {
        path: path.display().to_string(),
        exists: exists || next_sequence,
        registered: status.registered,
        attached_to_user: status.attached_to_user,
        event_sequence_number: status.event_sequence_number(),
        endpoint_key_hash: hex(&status.endpoint_key_hash),
        profile_hash: hex(&status.profile_hash),
        access_token: status.access_token.clone(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        _ => print_view(&view),
    }
    Ok(())
}

fn hex(digest: &Digest) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn print_view(view: &StatusView) {
    println!("Endpoint status: {}", view.path);
    if !view.exists {
        println!("  (no status file, showing defaults)");
    }
    println!();
    println!("  Registered:        {}", view.registered);
    println!("  Attached to user:  {}", view.attached_to_user);
    println!("  Event sequence:    {}", view.event_sequence_number);
    println!("  Endpoint key hash: {}", view.endpoint_key_hash);
    println!("  Profile hash:      {}", view.profile_hash);
    println!(
        "  Access token:      {}",
        view.access_token.as_deref().unwrap_or("-")
    );
}
