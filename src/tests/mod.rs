//! Binary-level tests: argument handling and complete runs against the simulated balance.
