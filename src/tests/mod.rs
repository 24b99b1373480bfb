//! Test-only support code (spec §2.4 of `SPEC_FULL.md`). Not part of
//! the public API; compiled only under `#[cfg(test)]` from `lib.rs`.
