/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Common support for building the CLI interface of a program serving gdb
//! through remora.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use remora::GdbConnection;
use remora::StubConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::load_config;

/// Port used when neither `--listen` nor `--socket` is given.
pub const DEFAULT_GDB_PORT: u16 = 1234;

// Arguments that are shared by programs embedding the stub. Using Clap, this
// is designed to be set from CLI args, or to be flattened into the program's
// own arguments.
//
// NOTE: Do not change this to a doc comment, clap would use it as the
// program's about text.
#[allow(missing_docs)]
#[derive(Debug, Clone, Parser)]
pub struct CommonStubArguments {
    /// Address to wait for the debugger on, e.g. 127.0.0.1:1234.
    #[clap(long = "listen", value_name = "ADDR", conflicts_with = "socket")]
    pub listen: Option<SocketAddr>,

    /// Unix domain socket to wait for the debugger on. The path must not
    /// exist yet.
    #[clap(long = "socket", value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// TOML file with stub settings. Settings it leaves out keep their
    /// defaults.
    #[clap(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Direct logging to a file.  This can also be set with the RUST_LOG_FILE environment
    /// variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Never offer no-acknowledgment mode to the debugger.
    #[clap(long = "no-ack-disabled")]
    pub no_ack_disabled: bool,
}

impl CommonStubArguments {
    /// Where to wait for the debugger.
    pub fn connection(&self) -> GdbConnection {
        match (&self.socket, self.listen) {
            (Some(path), _) => GdbConnection::Path(path.clone()),
            (None, Some(addr)) => GdbConnection::Addr(addr),
            (None, None) => GdbConnection::from(DEFAULT_GDB_PORT),
        }
    }

    /// The stub settings: the configuration file if any, overridden by the
    /// command-line flags.
    pub fn stub_config(&self) -> anyhow::Result<StubConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => StubConfig::default(),
        };
        if self.no_ack_disabled {
            config.allow_no_ack = false;
        }
        Ok(config)
    }

    pub fn init_tracing(&self) -> Option<WorkerGuard> {
        fn set_subscriber_with_writer<
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        >(
            writer: T,
        ) {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(writer)
                .finish();
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                eprintln!(" [remora] WARNING: a global tracing subscriber is already set");
            }
        }

        self.log_file
            .as_ref()
            .and_then(|lf| {
                let parent = lf.parent()?;
                let orig_filename = lf.file_name()?.to_os_string();
                let mut filename = orig_filename.clone();

                for _ in 0..100 {
                    if Path::new(parent).join(&filename).exists() {
                        filename = orig_filename.clone();
                        filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
                    } else {
                        break;
                    }
                }

                if Path::new(parent).join(&filename).exists() {
                    eprintln!(" [remora] WARNING: could not open log file, falling back to stderr");
                    None
                } else {
                    let file_writer = tracing_appender::rolling::never(parent, &filename);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

                    eprintln!(" [remora] Logging to file at {:?}", parent.join(&filename));
                    set_subscriber_with_writer(file_writer);
                    Some(guard)
                }
            })
            .or_else(|| {
                set_subscriber_with_writer(io::stderr);
                None
            })
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_connection() {
        let args = CommonStubArguments::try_parse_from(["stub"]).unwrap();
        assert_eq!(args.connection(), GdbConnection::from(DEFAULT_GDB_PORT));
        assert_eq!(args.stub_config().unwrap(), StubConfig::default());
    }

    #[test]
    fn listen_and_socket() {
        let args =
            CommonStubArguments::try_parse_from(["stub", "--listen", "0.0.0.0:2345"]).unwrap();
        assert_eq!(
            args.connection(),
            GdbConnection::Addr("0.0.0.0:2345".parse().unwrap())
        );

        let args =
            CommonStubArguments::try_parse_from(["stub", "--socket", "/tmp/gdb.sock"]).unwrap();
        assert_eq!(
            args.connection(),
            GdbConnection::Path(PathBuf::from("/tmp/gdb.sock"))
        );

        assert!(
            CommonStubArguments::try_parse_from([
                "stub",
                "--listen",
                "0.0.0.0:2345",
                "--socket",
                "/tmp/gdb.sock"
            ])
            .is_err()
        );
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "allow_no_ack = true").unwrap();
        writeln!(file, "multiprocess = false").unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let args = CommonStubArguments::try_parse_from([
            "stub",
            "--config",
            path.as_str(),
            "--no-ack-disabled",
        ])
        .unwrap();
        let config = args.stub_config().unwrap();
        assert!(!config.allow_no_ack);
        assert!(!config.multiprocess);
        assert!(config.non_stop);
    }
}
