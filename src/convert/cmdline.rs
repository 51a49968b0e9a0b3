// src/convert/cmdline.rs

//! Podman command-line builder.
//!
//! Accumulates one ordered argv that eventually becomes the generated
//! service's `ExecStart=`. Map-valued options (`--env`, `--label`,
//! `--annotation`) are emitted in sorted key order so converting the
//! same unit twice yields a byte-identical command line.

use std::collections::BTreeMap;

use crate::split;

/// Path of the container runtime frontend the generated units invoke
pub const PODMAN: &str = "/usr/bin/podman";

/// An ordered podman invocation under construction
#[derive(Debug, Clone)]
pub struct PodmanCmdline {
    args: Vec<String>,
}

impl PodmanCmdline {
    /// Start `podman <command>`
    pub fn new_command(command: &str) -> PodmanCmdline {
        PodmanCmdline {
            args: vec![PODMAN.to_string(), command.to_string()],
        }
    }

    pub fn add(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn add_slice<S: AsRef<str>>(&mut self, args: &[S]) -> &mut Self {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// `--flag` when true, `--flag=false` when false
    pub fn add_bool(&mut self, flag: &str, value: bool) -> &mut Self {
        if value {
            self.add(flag)
        } else {
            self.add(format!("{}=false", flag))
        }
    }

    /// One `--flag=key=value` per entry, in sorted key order
    pub fn add_keys(&mut self, flag: &str, map: &BTreeMap<String, String>) -> &mut Self {
        for (key, value) in map {
            self.add(format!("{}={}={}", flag, key, value));
        }
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Escape into a single `ExecStart=` value
    pub fn to_exec_start(&self) -> String {
        split::escape_words(&self.args)
    }
}
