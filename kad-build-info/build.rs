use vergen::EmitBuilder;

fn main() {
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .git_branch()
        .emit()
    {
        // Building outside of a git checkout (e.g. from a source tarball) is fine;
        // the consumer falls back to "unknown" for the git-derived fields.
        println!("cargo:warning=vergen could not collect build info: {e}");
    }
}
