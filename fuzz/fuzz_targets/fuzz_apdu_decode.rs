#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter_rs::dlms::apdu::decode;
use smartmeter_rs::reading::from_decoded;

fuzz_target!(|data: &[u8]| {
    let mut apdu = vec![0x0F, 0x80];
    apdu.extend_from_slice(data);
    if let Ok(Some(decoded)) = decode(&apdu) {
        let _ = from_decoded(&decoded).to_string();
    }
});
