// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for the test suites of this workspace. Not for production use.

use slog::o;
use slog::Drain;
use slog::Logger;
use std::sync::Mutex;

/// Returns a logger that writes through the test harness's captured stdout,
/// tagged with the test's name.
pub fn test_logger(test_name: &str) -> Logger {
    let decorator =
        slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = Mutex::new(drain).fuse();
    Logger::root(drain, o!("test" => test_name.to_string()))
}
