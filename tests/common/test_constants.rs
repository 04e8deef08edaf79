//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Fixed report file rewritten by every run.
pub const REPORT_FILE: &str = "provcheck-report.json";

/// Script that parses cleanly and has no inputs or host dependencies.
pub const VALID_SCRIPT: &str = "#!/bin/sh\nset -eu\necho \"configuring host\"\n";

/// Script whose `if` block is never closed.
pub const BROKEN_SCRIPT: &str = "#!/bin/sh\nif true; then\n  echo \"never closed\"\n";

/// Script that queries the instance metadata service.
pub const CLOUD_SCRIPT: &str =
    "#!/bin/sh\ncurl -s http://169.254.169.254/latest/meta-data/instance-id\n";

/// Script that refuses to run without an input.
pub const PARAMETERISED_SCRIPT: &str =
    "#!/bin/sh\n: \"${TARGET_HOST:?TARGET_HOST must be set}\"\nssh \"$TARGET_HOST\" uptime\n";
