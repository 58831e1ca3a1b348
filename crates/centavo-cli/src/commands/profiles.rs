//! Profile management commands

use anyhow::Result;

use centavo_core::Database;

pub fn cmd_profiles_list(db: &Database, include_inactive: bool) -> Result<()> {
    let profiles = db.list_profiles(include_inactive)?;
    if profiles.is_empty() {
        println!("No profiles. Create one with: centavo profiles add <id> -n <name> -m <mail>");
        return Ok(());
    }

    println!(
        "{:<12} {:<20} {:<28} {:<10} {:<12} {:<12}",
        "ID", "NAME", "MAIL", "ACTIVE", "LAST SYNC", "LAST STMT"
    );
    for profile in profiles {
        println!(
            "{:<12} {:<20} {:<28} {:<10} {:<12} {:<12}",
            profile.id,
            profile.name,
            profile.mail_address,
            if profile.active { "yes" } else { "no" },
            profile
                .last_sync_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            profile
                .last_statement_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

pub fn cmd_profiles_add(db: &Database, id: &str, name: &str, mail: &str) -> Result<()> {
    let profile = db.create_profile(id, name, mail)?;
    println!("Profile '{}' created ({})", profile.id, profile.name);
    println!("First sync will run in onboarding mode.");
    Ok(())
}

pub fn cmd_profiles_disable(db: &Database, id: &str) -> Result<()> {
    db.deactivate_profile(id)?;
    println!("Profile '{}' disabled (data retained)", id);
    Ok(())
}
