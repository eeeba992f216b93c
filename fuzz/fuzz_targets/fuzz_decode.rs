#![no_main]
use ipdb::decoder::DataDecoder;
use ipdb::MemorySource;
use libfuzzer_sys::fuzz_target;

// Decode arbitrary bytes as a data section; errors are fine, panics are not
fuzz_target!(|data: &[u8]| {
    let source = MemorySource::from_bytes(data.to_vec());
    let decoder = DataDecoder::new(&source, 0);

    let mut offset = 0u64;
    while offset < data.len() as u64 {
        match decoder.decode(offset) {
            Ok((_, next)) if next > offset => offset = next,
            _ => offset += 1,
        }
    }
});
