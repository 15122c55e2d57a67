use std::fmt::Write as _;

use super::binding::Binding;

/// Render the script-side proxies for `binding`.
///
/// Each method becomes `name.jsName(a0, a1, ..)`, which posts
/// `{scope, method, params}` as JSON through `invoke_channel`. The namespace object is only
/// created when it does not exist yet. Output is deterministic for a given binding.
pub fn generate_stub(binding: &Binding, invoke_channel: &str) -> String {
    let name = binding.name();
    let scope_literal = string_literal(name);

    let mut js = String::with_capacity(128 + binding.methods().len() * 160);
    let _ = write!(
        js,
        "if (typeof {name} === 'undefined') {{\n\t{name} = {{}};\n}}\n"
    );

    for method in binding.methods() {
        let args = (0..method.arity())
            .map(|i| format!("a{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            js,
            "{name}.{js_name} = function({args}) {{\n\t{invoke_channel}(JSON.stringify({{scope: {scope_literal}, method: {method_literal}, params: [{args}]}}));\n}};\n",
            js_name = method.js_name(),
            method_literal = string_literal(method.name()),
        );
    }

    js
}

fn string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""))
}
