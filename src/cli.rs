// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI options mapping onto [`Config`].
//!
//! Embedding binaries compose these options into their own
//! [`clap::Parser`] and fold them over a programmatic [`Config`]:
//!
//! ```
//! use clap::Parser as _;
//! use narrative::{cli::Cli, Config};
//!
//! #[derive(clap::Parser)]
//! struct Opts {
//!     #[command(flatten)]
//!     run: Cli,
//! }
//!
//! let opts = Opts::parse_from(["runner", "--threads", "4", "--batch"]);
//! let config = opts.run.apply_to(Config::default());
//! assert_eq!(config.threads, 4);
//! assert!(config.batch);
//! ```

use crate::config::Config;

/// Runtime options of a story run.
#[derive(Clone, Debug, clap::Args)]
pub struct Cli {
    /// Number of stories to run concurrently. If not specified, uses the
    /// value configured programmatically, or 1 by default.
    #[arg(long, short, value_name = "int", global = true)]
    pub threads: Option<usize>,

    /// Per-path timeout rule `pattern:duration`; repeatable, matched in
    /// order. Durations are compound ("1h 30m") or plain seconds.
    #[arg(long = "story-timeout", value_name = "rule", global = true)]
    pub story_timeouts: Vec<String>,

    /// Meta filter expression, e.g. "+smoke -skip".
    #[arg(long, value_name = "expr", global = true, allow_hyphen_values = true)]
    pub meta_filter: Option<String>,

    /// Fail scenarios containing unmatched steps instead of marking them
    /// pending.
    #[arg(long, global = true)]
    pub fail_on_pending: bool,

    /// Walk the whole tree without invoking any handler.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Keep collecting story outcomes past failures.
    #[arg(long, global = true)]
    pub ignore_failures: bool,

    /// Defer failure reporting to one aggregate raised after all stories
    /// finished.
    #[arg(long, global = true)]
    pub batch: bool,

    /// Record scenarios after a failure as not performed instead of running
    /// them.
    #[arg(long, global = true)]
    pub skip_after_failure: bool,
}

impl Cli {
    /// Folds these options over `config`; unset options keep the
    /// programmatic value.
    #[must_use]
    pub fn apply_to(self, mut config: Config) -> Config {
        if let Some(threads) = self.threads {
            config = config.threads(threads);
        }
        for rule in self.story_timeouts {
            config = config.story_timeout(rule);
        }
        if let Some(expression) = self.meta_filter {
            config = config.meta_filter(expression);
        }
        if self.fail_on_pending {
            config = config.fail_on_pending();
        }
        if self.dry_run {
            config = config.dry_run();
        }
        if self.ignore_failures {
            config = config.ignore_failure_in_stories();
        }
        if self.batch {
            config = config.batch();
        }
        if self.skip_after_failure {
            config = config.skip_scenarios_after_failure();
        }
        config
    }
}
