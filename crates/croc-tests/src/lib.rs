//! End-to-end scenarios from spec.md §8. Nothing lives here; every test is
//! an integration test under `tests/`, hand-assembling bytecode and driving
//! `croc-vm`/`croc-api` directly rather than running `.croc` source (there
//! is no compiler front-end in scope to produce it).
