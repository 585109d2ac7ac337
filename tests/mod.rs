
// This file organizes the integration tests into a cohesive test suite.
// Each module tests a specific aspect of the service:
// - smoke_tests: Basic config, time and parsing tests to ensure nothing is broken
// - store_mock: Mocking the durable store for testing without a real Redis instance
// - reconcile_tests: Pipeline-level property tests built on the store mock
