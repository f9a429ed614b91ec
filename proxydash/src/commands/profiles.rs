use clap::Subcommand;

use crate::client::{ApiClient, ServerInfo};
use crate::config::{DEFAULT_API_PORT, NewProfile, Platform, Profile, ProfilesToml, format_address};
use crate::output;

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Save a connection to a proxy's management API
    Add {
        /// Proxy host (IP or hostname)
        host: String,

        /// Profile name
        #[arg(long)]
        name: String,

        /// API port
        #[arg(long, default_value_t = DEFAULT_API_PORT)]
        port: u16,

        /// API key sent as the x-key header
        #[arg(long, env = "PROXYDASH_KEY", hide_env_values = true)]
        key: String,

        /// Skip the connectivity check
        #[arg(long)]
        no_test: bool,
    },

    /// Remove a profile
    #[command(visible_aliases = ["remove", "delete"])]
    Rm {
        /// Profile name or id
        profile: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// List saved profiles
    #[command(visible_alias = "list")]
    Ls {
        /// Probe each profile's API
        #[arg(long)]
        check: bool,
    },

    /// Make a profile the default for other commands
    Use {
        /// Profile name or id
        profile: String,
    },
}

pub fn run(cmd: ProfileCommands) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: ProfileCommands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ProfileCommands::Add {
            host,
            name,
            port,
            key,
            no_test,
        } => add_profile(&host, &name, port, &key, no_test).await,
        ProfileCommands::Rm { profile, yes } => remove_profile(&profile, yes),
        ProfileCommands::Ls { check } => list_profiles(check).await,
        ProfileCommands::Use { profile } => use_profile(&profile),
    }
}

async fn add_profile(
    host: &str,
    name: &str,
    port: u16,
    key: &str,
    no_test: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut profiles = ProfilesToml::load()?;
    let host = host.trim();
    let name = name.trim();

    if profiles.contains_name(name) {
        return Err(format!(
            "Profile name '{}' already exists. Use --name to pick another name.",
            name
        )
        .into());
    }

    let mut new_profile = NewProfile {
        name: name.to_string(),
        host: host.to_string(),
        port,
        key: key.to_string(),
        ..Default::default()
    };
    new_profile.validate()?;

    if !no_test {
        let client = ApiClient::new(host, port, key, profiles.dashboard.timeout())?;
        let address = format_address(host, port);
        let info = output::with_spinner_async(
            format!("Checking connection to {}", address),
            client.check(),
        )
        .await
        .map_err(|e| format!("Could not connect to {}: {}", address, e))?;
        output::success(&format!(
            "Connected ({})",
            describe_platform(info.platform, &info.platform_version)
        ));

        let ServerInfo {
            platform,
            platform_version,
            platform_build,
        } = info;
        new_profile.platform = platform;
        new_profile.platform_version = platform_version;
        new_profile.platform_build = platform_build;
    }

    let profile = profiles.add(new_profile)?;
    profiles.save()?;

    output::success(&format!(
        "Added profile {} ({})",
        output::emphasized(&profile.name),
        profile.address()
    ));
    output::muted("It is now the default profile.");
    Ok(())
}

fn remove_profile(selector: &str, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut profiles = ProfilesToml::load()?;

    let Some(profile) = profiles.get(selector) else {
        return Err(format!("Profile '{}' not found.", selector).into());
    };
    let name = profile.name.clone();

    if !yes {
        let confirmed = output::confirm(
            &format!("Remove profile {}?", output::emphasized(&name)),
            false,
        )?;
        if !confirmed {
            output::warning("Cancelled");
            return Ok(());
        }
    }

    profiles.remove(selector)?;
    profiles.save()?;

    output::success(&format!("Removed profile {}", output::emphasized(&name)));
    Ok(())
}

fn use_profile(selector: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut profiles = ProfilesToml::load()?;
    let name = profiles.select(selector)?.name.clone();
    profiles.save()?;

    output::success(&format!("Using profile {}", output::emphasized(&name)));
    Ok(())
}

async fn list_profiles(check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let profiles = ProfilesToml::load()?;

    if profiles.is_empty() {
        output::warning("No profiles saved");
        output::muted(&format!(
            "Run {} to add one.",
            output::emphasized("proxydash profiles add <host> --name <name> --key <key>")
        ));
        return Ok(());
    }

    let statuses = if check {
        Some(check_all(&profiles).await)
    } else {
        None
    };

    print_profiles_table(&profiles, statuses.as_deref());
    Ok(())
}

/// Probe every profile concurrently; results line up with `profiles.profiles`.
async fn check_all(profiles: &ProfilesToml) -> Vec<String> {
    let timeout = profiles.dashboard.timeout();
    let mut tasks = Vec::with_capacity(profiles.len());
    for profile in &profiles.profiles {
        let profile = profile.clone();
        tasks.push(tokio::spawn(async move {
            match ApiClient::for_profile(&profile, timeout) {
                Ok(client) => client.check().await.map(|_| ()).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }));
    }

    let mut statuses = Vec::with_capacity(tasks.len());
    for task in tasks {
        let status = match task.await {
            Ok(Ok(())) => "ok".to_string(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Connectivity check failed");
                "unreachable".to_string()
            }
            Err(_) => "unreachable".to_string(),
        };
        statuses.push(status);
    }
    statuses
}

fn describe_platform(platform: Platform, version: &str) -> String {
    match (platform, version.is_empty()) {
        (Platform::Unknown, _) => "unknown platform".to_string(),
        (platform, true) => platform.as_str().to_string(),
        (platform, false) => format!("{} {}", platform.as_str(), version),
    }
}

fn profile_row(profile: &Profile, is_default: bool, status: Option<&str>) -> String {
    let marker = if is_default { "*" } else { " " };
    let mut row = format!(
        "{} {:<20} {:<28} {:<18} {:<18}",
        marker,
        profile.name,
        profile.address(),
        describe_platform(profile.platform, &profile.platform_version),
        profile.id
    );
    if let Some(status) = status {
        row.push(' ');
        row.push_str(status);
    }
    row.trim_end().to_string()
}

fn print_profiles_table(profiles: &ProfilesToml, statuses: Option<&[String]>) {
    let mut header = format!(
        "  {:<20} {:<28} {:<18} {:<18}",
        "NAME", "ADDRESS", "PLATFORM", "ID"
    );
    if statuses.is_some() {
        header.push_str(" STATUS");
    }
    println!("{}", header.trim_end());
    println!("{}", "-".repeat(92));

    let default_id = profiles.last_used().map(|p| p.id.as_str());
    for (idx, profile) in profiles.profiles.iter().enumerate() {
        let status = statuses.and_then(|s| s.get(idx)).map(String::as_str);
        println!(
            "{}",
            profile_row(profile, default_id == Some(profile.id.as_str()), status)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            id: "V1StGXR8_Z5j".to_string(),
            name: "Mac".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6171,
            key: "k".to_string(),
            platform: Platform::MacOs,
            platform_version: "5.7.0".to_string(),
            platform_build: "2801".to_string(),
        }
    }

    #[test]
    fn describe_platform_handles_missing_version() {
        assert_eq!(describe_platform(Platform::MacOs, "5.7.0"), "macos 5.7.0");
        assert_eq!(describe_platform(Platform::Ios, ""), "ios");
        assert_eq!(describe_platform(Platform::Unknown, "1"), "unknown platform");
    }

    #[test]
    fn profile_row_marks_default_and_appends_status() {
        let row = profile_row(&profile(), true, Some("ok"));
        assert!(row.starts_with("* Mac"));
        assert!(row.contains("127.0.0.1:6171"));
        assert!(row.contains("macos 5.7.0"));
        assert!(row.ends_with(" ok"));

        let row = profile_row(&profile(), false, None);
        assert!(row.starts_with("  Mac"));
        assert!(row.ends_with("V1StGXR8_Z5j"));
    }

    #[test]
    fn profile_row_never_prints_the_key() {
        let mut p = profile();
        p.key = "super-secret-key".to_string();
        assert!(!profile_row(&p, false, None).contains("super-secret-key"));
    }
}
