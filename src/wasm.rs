use wasm_bindgen::prelude::*;

#[wasm_bindgen(js_name = transpileScript)]
pub fn transpile_script(raw_script: &str, object_id: &str) -> String {
    crate::transpile_script(raw_script, object_id)
}

#[wasm_bindgen(js_name = transpileFunction)]
pub fn transpile_function(raw_script: &str, function_id: &str) -> String {
    crate::transpile_function(raw_script, function_id)
}
