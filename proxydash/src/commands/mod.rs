pub mod profiles;
pub mod requests;
pub mod traffic;

use crate::client::ApiClient;
use crate::config::{DashboardSettings, Profile, ProfilesToml};

/// The profile a command talks to, with its settings and a ready client.
pub struct Session {
    pub profile: Profile,
    pub settings: DashboardSettings,
    pub client: ApiClient,
}

impl Session {
    pub fn open(selector: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = ProfilesToml::load()?;
        if config.is_empty() {
            return Err(
                "No profiles saved. Run 'proxydash profiles add <host> --name <name> --key <key>' first."
                    .into(),
            );
        }

        let profile = config.resolve(selector)?.clone();
        let settings = config.dashboard.clone();
        let client = ApiClient::for_profile(&profile, settings.timeout())?;
        tracing::info!(profile = %profile.name, url = %client.base_url(), "Using profile");

        Ok(Self {
            profile,
            settings,
            client,
        })
    }
}
