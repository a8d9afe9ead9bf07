use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::remote::{
  DEFAULT_OWNER,
  DEFAULT_TABLE,
  RemoteSettings
};

pub const ENV_RC: &str = "TICKLISTRC";
pub const ENV_REMOTE_URL: &str =
  "TICKLIST_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str =
  "TICKLIST_REMOTE_KEY";

const DEFAULT_CELEBRATE_DELAY_MS: u64 =
  300;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 =
  15;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (k, v) in [
      ("data.location", "~/.ticklist"),
      ("color", "on"),
      ("celebrate", "on"),
      ("celebrate.delay_ms", "300"),
      ("remote.table", DEFAULT_TABLE),
      ("remote.owner", DEFAULT_OWNER),
      ("remote.timeout_secs", "15")
    ] {
      map.insert(
        k.to_string(),
        v.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file, then
  /// the remote credentials from the
  /// environment.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc =
      resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading ticklistrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no ticklistrc found; using \
         defaults"
      );
    }

    cfg.apply_env(|name| {
      std::env::var(name).ok()
    });
    Ok(cfg)
  }

  pub fn apply_env<F>(
    &mut self,
    lookup: F
  ) where
    F: Fn(&str) -> Option<String>
  {
    for (var, key) in [
      (ENV_REMOTE_URL, "remote.url"),
      (ENV_REMOTE_KEY, "remote.key")
    ] {
      if let Some(value) = lookup(var)
        && !value.trim().is_empty()
      {
        debug!(var, key, "config value from environment");
        self.map.insert(
          key.to_string(),
          value
        );
      }
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn set(
    &mut self,
    key: &str,
    value: &str
  ) {
    self.map.insert(
      key.to_string(),
      value.to_string()
    );
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<u64>()
      .map(Some)
      .map_err(|e| {
        anyhow!(
          "invalid number for {key}: \
           {raw} ({e})"
        )
      })
  }

  /// Present and non-blank.
  fn get_non_blank(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .map(|v| v.trim())
      .filter(|v| !v.is_empty())
      .map(str::to_string)
  }

  /// `None` unless both the endpoint and
  /// the access key are set.
  pub fn remote_settings(
    &self
  ) -> anyhow::Result<Option<RemoteSettings>>
  {
    let (Some(url), Some(key)) = (
      self.get_non_blank("remote.url"),
      self.get_non_blank("remote.key")
    ) else {
      return Ok(None);
    };

    let table = self
      .get_non_blank("remote.table")
      .unwrap_or_else(|| {
        DEFAULT_TABLE.to_string()
      });
    let owner = self
      .get_non_blank("remote.owner")
      .unwrap_or_else(|| {
        DEFAULT_OWNER.to_string()
      });
    let timeout_secs = self
      .get_u64("remote.timeout_secs")?
      .unwrap_or(
        DEFAULT_REMOTE_TIMEOUT_SECS
      );

    Ok(Some(RemoteSettings {
      url,
      key,
      table,
      owner,
      timeout: Duration::from_secs(
        timeout_secs
      )
    }))
  }

  pub fn celebrate_enabled(
    &self
  ) -> bool {
    self
      .get_bool("celebrate")
      .unwrap_or(true)
  }

  pub fn celebrate_delay(
    &self
  ) -> anyhow::Result<Duration> {
    let ms = self
      .get_u64("celebrate.delay_ms")?
      .unwrap_or(
        DEFAULT_CELEBRATE_DELAY_MS
      );
    Ok(Duration::from_millis(ms))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
          continue;
        }

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(ENV_RC)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    return Ok(None);
  };
  let candidate =
    home.join(".ticklistrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".ticklist"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use super::Config;

  #[test]
  fn remote_needs_both_settings() {
    let mut cfg = Config::default();
    let configured = |cfg: &Config| {
      cfg
        .remote_settings()
        .unwrap()
        .is_some()
    };
    assert!(!configured(&cfg));

    cfg.set(
      "remote.url",
      "https://example.test"
    );
    assert!(!configured(&cfg));

    cfg.set("remote.key", "   ");
    assert!(!configured(&cfg));

    cfg.set("remote.key", "anon");
    assert!(configured(&cfg));

    let settings = cfg
      .remote_settings()
      .unwrap()
      .unwrap();
    assert_eq!(settings.table, "todos");
    assert_eq!(
      settings.owner,
      "demo-user-001"
    );
    assert_eq!(
      settings.timeout,
      Duration::from_secs(15)
    );
  }

  #[test]
  fn environment_fills_remote_credentials()
   {
    let mut cfg = Config::default();
    cfg.apply_env(|name| match name {
      | "TICKLIST_REMOTE_URL" => {
        Some("https://db.test".into())
      }
      | "TICKLIST_REMOTE_KEY" => {
        Some("secret".into())
      }
      | _ => None
    });
    let settings = cfg
      .remote_settings()
      .unwrap()
      .expect("remote settings");
    assert_eq!(
      settings.url,
      "https://db.test"
    );
    assert_eq!(settings.key, "secret");
  }

  #[test]
  fn rc_file_includes_and_overrides() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra");
    fs::write(
      &extra,
      "celebrate.delay_ms = 50\n"
    )
    .unwrap();
    let rc = dir.path().join("rc");
    fs::write(
      &rc,
      "# comment\ncelebrate = off  # \
       quiet\ninclude extra\n"
    )
    .unwrap();

    let mut cfg =
      Config::load(Some(&rc)).unwrap();
    assert!(!cfg.celebrate_enabled());
    assert_eq!(
      cfg.celebrate_delay().unwrap(),
      Duration::from_millis(50)
    );

    cfg.apply_overrides(vec![(
      "rc.celebrate".to_string(),
      "on".to_string()
    )]);
    assert!(cfg.celebrate_enabled());
  }

  #[test]
  fn bad_numbers_are_errors() {
    let mut cfg = Config::default();
    cfg.set(
      "celebrate.delay_ms",
      "soon"
    );
    assert!(
      cfg.celebrate_delay().is_err()
    );
  }
}
