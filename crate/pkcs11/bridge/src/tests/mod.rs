mod config;
mod info;
mod mock;
#[cfg(feature = "softhsm2")]
mod softhsm2;

const TEST_LIB: &str = "/usr/lib/pkcs11/libmock.so";
const OTHER_TEST_LIB: &str = "/usr/lib/pkcs11/libother.so";
