//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

use crate::error::Result;
use crate::params::{DecodeFailurePolicy, Settings};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "agentstage")]
#[command(about = "Audio-reactive talking agent avatar", long_about = None)]
pub struct Args {
    /// YAML config file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address for the JSON-lines event channel
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Directory that root-relative image and audio references resolve against
    #[arg(long, value_name = "DIR")]
    pub assets: Option<PathBuf>,

    /// Fetch root-relative audio from this server instead of the asset directory
    #[arg(long, value_name = "URL")]
    pub audio_base_url: Option<String>,

    /// Slide the avatar away when a clip cannot be fetched or decoded
    #[arg(long)]
    pub hide_on_failure: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn init_logging(&self) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&self.log_level))
            .init();
    }

    /// Load the config file and layer command-line overrides on top
    pub fn load_settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(listen) = &self.listen {
            settings.transport.listen = listen.clone();
        }
        if let Some(assets) = &self.assets {
            settings.audio.asset_root = assets.clone();
        }
        if let Some(base_url) = &self.audio_base_url {
            settings.audio.base_url = Some(base_url.clone());
        }
        if self.hide_on_failure {
            settings.audio.decode_failure = DecodeFailurePolicy::Hide;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_leave_settings_alone() {
        let args = Args::parse_from(["agentstage"]);
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.transport.listen, "127.0.0.1:5055");
        assert_eq!(settings.audio.base_url, None);
        assert_eq!(settings.audio.decode_failure, DecodeFailurePolicy::KeepVisible);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_flags_override_settings() {
        let args = Args::parse_from([
            "agentstage",
            "--listen",
            "0.0.0.0:6000",
            "--assets",
            "/srv/site",
            "--audio-base-url",
            "http://127.0.0.1:5000",
            "--hide-on-failure",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.transport.listen, "0.0.0.0:6000");
        assert_eq!(settings.audio.asset_root, PathBuf::from("/srv/site"));
        assert_eq!(settings.audio.base_url.as_deref(), Some("http://127.0.0.1:5000"));
        assert_eq!(settings.audio.decode_failure, DecodeFailurePolicy::Hide);
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let args = Args::parse_from(["agentstage", "--config", missing.to_str().unwrap()]);
        assert!(args.load_settings().is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "transport:\n  listen: 127.0.0.1:7000\nstage:\n  transition_ms: 100\n")
            .unwrap();

        let args = Args::parse_from([
            "agentstage",
            "--config",
            path.to_str().unwrap(),
            "--hide-on-failure",
        ]);
        let settings = args.load_settings().unwrap();

        assert_eq!(settings.transport.listen, "127.0.0.1:7000");
        assert_eq!(settings.stage.transition_ms, 100);
        assert_eq!(settings.audio.decode_failure, DecodeFailurePolicy::Hide);
    }
}
