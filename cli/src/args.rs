use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use errand_config::DeliveryMode;

pub const USAGE: &str = "\
usage: errand [--config <path>] [--polled | --threaded] <command>

commands:
  login <custom-id> [--create]          log in and print the player id
  call <path> <json> [--as <custom-id>] post <json> to <path> and print the result data
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        custom_id: String,
        create_account: bool,
    },
    Call {
        path: String,
        body: String,
        /// Log in with this custom id first and make the call as that player.
        login_as: Option<String>,
    },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub delivery: Option<DeliveryMode>,
    pub command: Command,
}

impl Args {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut config = None;
        let mut delivery = None;
        let mut create_account = false;
        let mut login_as = None;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => {
                    return Ok(Self {
                        config,
                        delivery,
                        command: Command::Help,
                    });
                }
                "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    config = Some(PathBuf::from(path));
                }
                "--polled" => delivery = Some(DeliveryMode::Polled),
                "--threaded" => delivery = Some(DeliveryMode::Threaded),
                "--create" => create_account = true,
                "--as" => {
                    login_as = Some(args.next().context("--as needs a custom id")?);
                }
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            None | Some("help") => Command::Help,
            Some("login") => {
                let custom_id = positional.next().context("login needs a custom id")?;
                Command::Login {
                    custom_id,
                    create_account,
                }
            }
            Some("call") => {
                let path = positional.next().context("call needs a path")?;
                let body = positional.next().unwrap_or_else(|| "{}".to_string());
                Command::Call {
                    path,
                    body,
                    login_as,
                }
            }
            Some(other) => bail!("unknown command {other}"),
        };
        if let Some(extra) = positional.next() {
            bail!("unexpected argument {extra}");
        }

        Ok(Self {
            config,
            delivery,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, Command};
    use errand_config::DeliveryMode;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> anyhow::Result<Args> {
        Args::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn login_with_options() {
        let args = parse(&["--polled", "login", "player-1", "--create"]).unwrap();
        assert_eq!(args.delivery, Some(DeliveryMode::Polled));
        assert_eq!(
            args.command,
            Command::Login {
                custom_id: "player-1".into(),
                create_account: true,
            }
        );
    }

    #[test]
    fn call_defaults_to_empty_body() {
        let args = parse(&["--config", "/tmp/errand.toml", "call", "/Client/GetTime"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/errand.toml")));
        assert_eq!(args.delivery, None);
        assert_eq!(
            args.command,
            Command::Call {
                path: "/Client/GetTime".into(),
                body: "{}".into(),
                login_as: None,
            }
        );
    }

    #[test]
    fn call_as_player() {
        let args = parse(&["call", "/Client/GetUserData", r#"{"Keys":[]}"#, "--as", "p1"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Call { login_as: Some(ref id), .. } if id == "p1"
        ));
    }

    #[test]
    fn no_arguments_prints_help() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(parse(&["call", "--help"]).unwrap().command, Command::Help);
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse(&["login"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--verbose", "login", "p1"]).is_err());
        assert!(parse(&["logout"]).is_err());
        assert!(parse(&["call", "/Client/GetTime", "{}", "extra"]).is_err());
    }
}
