#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter_rs::dlms::apdu::extract_fields;
use smartmeter_rs::dlms::axdr::parse_data;

fuzz_target!(|data: &[u8]| {
    if let Ok((_, node)) = parse_data(data) {
        let _ = extract_fields(&node);
        assert!(!node.to_bytes().is_empty());
    }
});
