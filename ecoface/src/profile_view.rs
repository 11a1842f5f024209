//! Profile screen: identity header, danger summary and the toxin list.

use ecoface_core::{AccessLevel, DangerTier, ProfileManager, Record, RecordFields};

use crate::input::Input;
use crate::notify;

const PAGE_SIZE: usize = 10;

pub enum ProfileExit {
    Back,
    Quit,
}

pub fn run(manager: &mut ProfileManager, input: &Input) -> ProfileExit {
    if let Err(e) = manager.refresh() {
        notify::error(format!("Could not load toxins: {}", e));
    }
    print_header(manager);
    print_page(manager);

    loop {
        let Some(line) = input.prompt(&command_help(manager)) else {
            return ProfileExit::Quit;
        };
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line.as_str(), ""),
        };

        match command {
            "" | "list" => {
                print_header(manager);
                print_page(manager);
            }
            "next" => {
                manager.set_view_offset(manager.view_offset() + PAGE_SIZE);
                print_page(manager);
            }
            "prev" => {
                manager.set_view_offset(manager.view_offset().saturating_sub(PAGE_SIZE));
                print_page(manager);
            }
            "refresh" => match manager.refresh() {
                Ok(records) => notify::success(format!("{} toxin(s) loaded", records.len())),
                Err(e) => notify::error(e),
            },
            "add" | "edit" | "delete" if !manager.can_manage_records() => {
                notify::warning("Only the Environment Minister can manage toxins");
            }
            "add" => add(manager, input),
            "edit" => edit(manager, input, arg),
            "delete" => delete(manager, input, arg),
            "delete-account" => {
                if !input.confirm("Delete your account? This cannot be undone.") {
                    continue;
                }
                match manager.delete_account() {
                    Ok(()) => {
                        notify::success("Account deleted");
                        return ProfileExit::Back;
                    }
                    Err(e) => notify::error(e),
                }
            }
            "photo" => save_photo(manager, arg),
            "back" => return ProfileExit::Back,
            "quit" | "q" => return ProfileExit::Quit,
            other => notify::warning(format!("Unknown command '{}'", other)),
        }
    }
}

fn command_help(manager: &ProfileManager) -> String {
    if manager.can_manage_records() {
        concat!(
            "[list|next|prev|refresh|photo <path>|add|edit <id>|delete <id>",
            "|delete-account|back|quit]>"
        )
        .to_string()
    } else {
        "[list|next|prev|refresh|photo <path>|delete-account|back|quit]>".to_string()
    }
}

fn print_header(manager: &ProfileManager) {
    let Some(identity) = manager.identity() else { return };
    let summary = manager.danger_summary();
    println!("\n== {} ==", identity.name);
    println!("Access: {} ({})", identity.access_level.label(), identity.access_level);
    match identity.reference_jpeg() {
        Ok(Some(jpeg)) => println!(
            "Reference photo: {} KiB (`photo <path>` saves it)",
            jpeg.len() / 1024
        ),
        Ok(None) => {}
        Err(e) => notify::warning(format!("Reference photo unreadable: {}", e)),
    }
    println!(
        "Toxins: {} total | High {} | Medium {} | Low {}",
        manager.records().len(),
        summary.high,
        summary.medium,
        summary.low
    );
}

fn print_page(manager: &ProfileManager) {
    let records = manager.records();
    if records.is_empty() {
        println!("No toxins registered.");
        return;
    }
    let start = manager.view_offset().min(records.len() - 1);
    let end = (start + PAGE_SIZE).min(records.len());
    for record in &records[start..end] {
        println!("{}", format_record(record));
    }
    println!("({}-{} of {})", start + 1, end, records.len());
}

fn format_record(record: &Record) -> String {
    let created = record
        .created_at_utc()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "  {:<26} {:<24} {:<16} danger {:<6} {:<20} {}",
        record.id,
        record.name,
        if record.category.is_empty() { "-" } else { record.category.as_str() },
        record.danger.label(),
        record.access_level.label(),
        created
    )
}

fn save_photo(manager: &ProfileManager, path: &str) {
    if path.is_empty() {
        notify::warning("usage: photo <path>");
        return;
    }
    let Some(identity) = manager.identity() else { return };
    match identity.reference_jpeg() {
        Ok(Some(jpeg)) => match std::fs::write(path, &jpeg) {
            Ok(()) => notify::success(format!("Reference photo saved to {}", path)),
            Err(e) => notify::error(format!("Cannot write {}: {}", path, e)),
        },
        Ok(None) => notify::warning("No reference photo on file"),
        Err(e) => notify::error(e),
    }
}

fn add(manager: &mut ProfileManager, input: &Input) {
    let Some(fields) = read_fields(input, &RecordFields::default()) else { return };
    match manager.add_record(&fields) {
        Ok(record) => {
            notify::success(format!("Toxin '{}' added", record.name));
            print_page(manager);
        }
        Err(e) => notify::error(e),
    }
}

fn edit(manager: &mut ProfileManager, input: &Input, id: &str) {
    let current = match manager.records().iter().find(|r| r.id == id) {
        Some(record) => record.fields(),
        None if id.is_empty() => {
            notify::warning("usage: edit <id>");
            return;
        }
        // Not cached; the service decides whether it exists.
        None => RecordFields::default(),
    };
    let Some(fields) = read_fields(input, &current) else { return };
    match manager.edit_record(id, &fields) {
        Ok(()) => {
            notify::success(format!("Toxin '{}' updated", fields.name));
            print_page(manager);
        }
        Err(e) => notify::error(e),
    }
}

fn delete(manager: &mut ProfileManager, input: &Input, id: &str) {
    if id.is_empty() {
        notify::warning("usage: delete <id>");
        return;
    }
    if !input.confirm(&format!("Delete toxin {}?", id)) {
        return;
    }
    match manager.delete_record(id) {
        Ok(()) => {
            notify::success("Toxin deleted");
            print_page(manager);
        }
        Err(e) => notify::error(e),
    }
}

fn read_fields(input: &Input, current: &RecordFields) -> Option<RecordFields> {
    let name = input.prompt_default("Name", &current.name)?;
    let category = input.prompt_default("Type", &current.category)?;
    let danger = input.prompt_default(
        "Danger (1 low, 2 medium, 3 high)",
        &(current.danger as u8).to_string(),
    )?;
    let level =
        input.prompt_default("Access level (1-3)", &current.access_level.as_u8().to_string())?;

    let danger = match parse_danger(&danger) {
        Some(tier) => tier,
        None => {
            notify::error(format!("'{}' is not a danger tier", danger));
            return None;
        }
    };
    let parsed = level
        .parse::<u8>()
        .map_err(|e| e.to_string())
        .and_then(AccessLevel::try_from);
    let access_level = match parsed {
        Ok(level) => level,
        Err(e) => {
            notify::error(e);
            return None;
        }
    };

    Some(RecordFields {
        name: name.trim().to_string(),
        category: category.trim().to_string(),
        danger,
        access_level,
    })
}

fn parse_danger(value: &str) -> Option<DangerTier> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Some(DangerTier::Low),
        "medium" => Some(DangerTier::Medium),
        "high" => Some(DangerTier::High),
        other => other.parse::<u8>().ok().and_then(|n| DangerTier::try_from(n).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn danger_accepts_numbers_and_labels() {
        assert_eq!(parse_danger("3"), Some(DangerTier::High));
        assert_eq!(parse_danger(" Medium "), Some(DangerTier::Medium));
        assert_eq!(parse_danger("low"), Some(DangerTier::Low));
        assert_eq!(parse_danger("4"), None);
        assert_eq!(parse_danger("severe"), None);
    }

    #[test]
    fn record_line_shows_labels() {
        let record: Record = serde_json::from_str(
            r#"{"_id": "t9", "nome": "Mercury", "tipo": "Metal", "periculosidade": 3, "nivel": 2,
                "criado_em": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let line = format_record(&record);
        assert!(line.contains("Mercury"));
        assert!(line.contains("danger High"));
        assert!(line.contains("Restricted access"));
        assert!(line.contains("2024-05-01"));
    }
}
