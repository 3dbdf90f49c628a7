#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter_rs::mbus::{parse_frame, split};
use smartmeter_rs::RawWindow;

fuzz_target!(|data: &[u8]| {
    let _ = parse_frame(data);

    // Keep the start marker intact so the checks behind it get exercised.
    let mut window = data.to_vec();
    if window.len() >= 4 {
        window[0] = 0x68;
        window[2] = window[1];
        window[3] = 0x68;
    }
    let _ = split(&RawWindow::from(window));
});
