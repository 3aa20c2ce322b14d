use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::client::ClientConfig;
use crate::util::strip_quotes;

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    resolve(url, key, verify, &non_empty_env, &rc_candidates())
}

/// Precedence walk over explicit values, `env` and the first existing file
/// in `rc_candidates`.
fn resolve(
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
    env: &dyn Fn(&str) -> Option<String>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| env("PZSVC_URL"));
    let mut key = key.or_else(|| env("PZSVC_AUTH"));

    let mut file_verify: Option<bool> = None;

    if url.is_none() || key.is_none() || verify.is_none() {
        for rc_path in rc_candidates {
            if rc_path.exists() {
                let cfg = read_rc(rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;

                if url.is_none() {
                    url = cfg.url;
                }
                if key.is_none() {
                    key = cfg.key;
                }
                file_verify = cfg.verify;
                break;
            }
        }
    }

    // Deployments historically only exported the domain the gateway lives under.
    let url = url.or_else(|| env("DOMAIN").map(|d| gateway_for_domain(&d)));

    let Some(url) = url else {
        bail!(
            "Missing configuration: url (set PZSVC_URL or DOMAIN, or put `url:` in one of: {})",
            describe(rc_candidates)
        );
    };

    let Some(key) = key else {
        bail!(
            "Missing configuration: key (set PZSVC_AUTH or put `key:` in one of: {})",
            describe(rc_candidates)
        );
    };

    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ClientConfig { url, key, verify })
}

pub(crate) fn gateway_for_domain(domain: &str) -> String {
    format!("https://pz-gateway.{}", domain.trim().trim_matches('.'))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn describe(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return ".pzsvcrc".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // `key:` may sit alone on a line with the credential on the next one.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || looks_like_url(line) {
                let v = strip_quotes(line);
                match pk {
                    "url" => cfg.url = Some(v.to_string()),
                    "key" => cfg.key = Some(v.to_string()),
                    _ => {}
                }
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "url" | "key" if v.is_empty() => pending_key = Some(k),
                "url" => cfg.url = Some(v.to_string()),
                "key" => cfg.key = Some(v.to_string()),
                "verify" => {
                    if !v.is_empty() {
                        cfg.verify = Some(v != "0" && !v.eq_ignore_ascii_case("false"));
                    }
                }
                _ => {}
            }
        }
    }

    cfg
}

fn looks_like_url(line: &str) -> bool {
    let line = strip_quotes(line);
    line.starts_with("http://") || line.starts_with("https://")
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) PZSVC_RC (explicit)
    // 2) ./.pzsvcrc
    // 3) ~/.pzsvcrc
    if let Ok(p) = std::env::var("PZSVC_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".pzsvcrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".pzsvcrc"));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rc_inline() {
        let cfg = parse_rc(
            "# gateway\nurl: https://pz-gateway.example.com\nkey: \"Basic abc123\"\nverify: 0\n",
        );
        assert_eq!(cfg.url.as_deref(), Some("https://pz-gateway.example.com"));
        assert_eq!(cfg.key.as_deref(), Some("Basic abc123"));
        assert_eq!(cfg.verify, Some(false));
    }

    #[test]
    fn test_parse_rc_value_on_next_line() {
        let cfg = parse_rc("url:\n  https://gw.example.com\nkey:\n  'tok'\n");
        assert_eq!(cfg.url.as_deref(), Some("https://gw.example.com"));
        assert_eq!(cfg.key.as_deref(), Some("tok"));
        assert_eq!(cfg.verify, None);
    }

    #[test]
    fn test_parse_rc_dangling_key_ignored() {
        let cfg = parse_rc("key:\nverify: 1\n");
        assert_eq!(cfg.key, None);
        assert_eq!(cfg.verify, Some(true));
    }

    #[test]
    fn test_explicit_arguments_win() {
        let cfg = load_config(
            Some("http://localhost:8081".to_string()),
            Some("k".to_string()),
            Some(false),
        )
        .unwrap();
        assert_eq!(cfg.url, "http://localhost:8081");
        assert_eq!(cfg.key, "k");
        assert!(!cfg.verify);
    }

    fn rc_file(name: &str, text: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pzsvc-rc-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".pzsvcrc");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_read_rc_from_disk() {
        let path = rc_file("read", "url: https://gw.example.com\nkey: 'tok'\nverify: false\n");
        let cfg = read_rc(&path).unwrap();
        assert_eq!(cfg.url.as_deref(), Some("https://gw.example.com"));
        assert_eq!(cfg.key.as_deref(), Some("tok"));
        assert_eq!(cfg.verify, Some(false));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_rc_fills_what_env_leaves_out() {
        let path = rc_file("fallback", "url: https://from-file\nkey: file-key\nverify: 0\n");
        let missing = path.with_file_name("absent.rc");
        let env = |name: &str| (name == "PZSVC_URL").then(|| "https://from-env".to_string());

        let cfg = resolve(None, None, None, &env, &[missing, path.clone()]).unwrap();
        assert_eq!(cfg.url, "https://from-env");
        assert_eq!(cfg.key, "file-key");
        assert!(!cfg.verify);

        // Explicit verify wins over the file.
        let cfg = resolve(None, None, Some(true), &no_env, &[path.clone()]).unwrap();
        assert_eq!(cfg.url, "https://from-file");
        assert!(cfg.verify);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_domain_fallback_and_missing_key() {
        let env = |name: &str| (name == "DOMAIN").then(|| "int.example.io".to_string());
        let cfg = resolve(None, Some("k".to_string()), None, &env, &[]).unwrap();
        assert_eq!(cfg.url, "https://pz-gateway.int.example.io");
        assert!(cfg.verify);

        let err = resolve(Some("http://gw".to_string()), None, None, &no_env, &[]).unwrap_err();
        assert!(err.to_string().contains("PZSVC_AUTH"));
    }

    #[test]
    fn test_gateway_for_domain() {
        assert_eq!(gateway_for_domain("stage.example.io"), "https://pz-gateway.stage.example.io");
        assert_eq!(gateway_for_domain(".int.example.io "), "https://pz-gateway.int.example.io");
    }
}
