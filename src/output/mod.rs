mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_rows;
pub use progress::StageSpinner;
pub use styling::{banner, failure, muted};
pub use summary::{print_branches, print_summary};

/// Prints the release-recon banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        banner("🧾 release-recon"),
        muted(env!("CARGO_PKG_VERSION")),
        muted("Release Reconciliation Tool")
    );
}
