//! Unit test modules.

mod geo_test;
