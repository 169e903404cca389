use std::{process::Command, time::SystemTime};

fn main() {
  let now = SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or(0);
  println!("cargo:rustc-env=BUILD_TIME={}", now);

  println!("cargo:rerun-if-changed=.git/HEAD");
  println!("cargo:rerun-if-changed=.git/refs/heads");

  let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into());
  let commit = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".into());
  let commit_time = git(&["show", "-s", "--format=%ct", "HEAD"])
    .and_then(|s| s.parse::<u64>().ok())
    .map(|secs| secs * 1000)
    .unwrap_or(0);

  println!("cargo:rustc-env=GIT_BRANCH={}", branch);
  println!("cargo:rustc-env=GIT_COMMIT={}", commit);
  println!("cargo:rustc-env=GIT_COMMIT_TIME={}", commit_time);
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let value = String::from_utf8(output.stdout).ok()?.trim().to_string();
  (!value.is_empty()).then_some(value)
}
