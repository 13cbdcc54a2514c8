/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Command line pieces shared by the mock server binaries.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Parses a `KEY=VALUE` argument. The value may be empty, the key may not.
pub fn parse_key_value(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid KEY=VALUE: no `=` in {:?}", s))?;
    if key.is_empty() {
        anyhow::bail!("Invalid KEY=VALUE: key is empty");
    }
    Ok((key.to_owned(), value.to_owned()))
}

// Arguments shared by every binary in this workspace.
//
// NOTE: Not a doc comment, clap would turn it into the flattened command's
// about text.
#[derive(Debug, Clone, Default, Parser)]
pub struct CommonArguments {
    /// Direct logging to a file.  This can also be set with the RUST_LOG_FILE environment
    /// variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[clap(long = "log-level", value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}

/// Picks a file name next to `path` that does not exist yet, appending a
/// timestamp when needed.
fn fresh_log_path(path: &Path) -> Option<(PathBuf, std::ffi::OsString)> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let orig_filename = path.file_name()?.to_os_string();
    let mut filename = orig_filename.clone();

    for _ in 0..100 {
        if parent.join(&filename).exists() {
            filename = orig_filename.clone();
            filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
        } else {
            return Some((parent, filename));
        }
    }
    None
}

impl CommonArguments {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }

    /// Installs the global subscriber, writing to `--log-file` if given and to
    /// stderr otherwise. Keep the returned guard alive until exit so buffered
    /// lines are flushed.
    pub fn init_tracing(&self) -> anyhow::Result<Option<WorkerGuard>> {
        fn set_subscriber_with_writer<T>(filter: EnvFilter, writer: T) -> anyhow::Result<()>
        where
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(())
        }

        if let Some(log_file) = &self.log_file {
            match fresh_log_path(log_file) {
                Some((parent, filename)) => {
                    let file_writer = tracing_appender::rolling::never(&parent, &filename);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_writer);
                    eprintln!(" [gdbmock] Logging to file at {:?}", parent.join(&filename));
                    set_subscriber_with_writer(self.env_filter(), file_writer)?;
                    return Ok(Some(guard));
                }
                None => {
                    eprintln!(
                        " [gdbmock] WARNING: could not open log file, falling back to stderr"
                    );
                }
            }
        }
        set_subscriber_with_writer(self.env_filter(), io::stderr)?;
        Ok(None)
    }
}
