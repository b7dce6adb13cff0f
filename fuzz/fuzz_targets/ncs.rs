#![no_main]

use libfuzzer_sys::fuzz_target;
use ncscope::decompiler::{ActionTable, Decompiler, DecompilerConfig};

fuzz_target!(|data: &[u8]| {
    let actions = ActionTable::parse("void PrintInteger(int nInteger);\nint Random(int nMaxInteger);")
        .unwrap_or_default();
    let _ = Decompiler::new(actions, DecompilerConfig::default()).decompile(data);
});
