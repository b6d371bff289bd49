pub mod adapter;
pub mod domain;
pub mod infrastructure;
pub mod usecase;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
