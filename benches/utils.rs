use rand::{Rng, SeedableRng, rngs::StdRng};

const TAGS: [&str; 6] = ["div", "span", "p", "section", "li", "button"];
const FIELDS: [&str; 5] = ["name", "value", "label", "count", "title"];

/// Generate n random template sources to use in the benchmark
pub fn generate_random_templates(n: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    (0..n).map(|_| random_node(&mut rng, 0)).collect()
}

fn random_node(rng: &mut StdRng, depth: usize) -> String {
    let tag = TAGS[rng.random_range(0..TAGS.len())];
    let field = FIELDS[rng.random_range(0..FIELDS.len())];

    let mut attrs = String::new();
    if rng.random_bool(0.3) {
        attrs.push_str(&format!(" t-att-class=\"state.{field} ? 'on' : 'off'\""));
    }
    if rng.random_bool(0.2) {
        attrs.push_str(&format!(" t-on-click=\"() => this.select('{field}')\""));
    }

    let mut children = String::new();
    if depth < 3 {
        for _ in 0..rng.random_range(1..4) {
            children.push_str(&random_child(rng, depth + 1));
        }
    } else {
        children.push_str(&format!("<t t-esc=\"state.{field}\"/>"));
    }
    format!("<{tag}{attrs}>{children}</{tag}>")
}

fn random_child(rng: &mut StdRng, depth: usize) -> String {
    let field = FIELDS[rng.random_range(0..FIELDS.len())];
    match rng.random_range(0..5) {
        0 => format!(
            "<t t-foreach=\"state.{field}s\" t-as=\"{field}\" t-key=\"{field}_index\">{}</t>",
            random_node(rng, depth)
        ),
        1 => format!(
            "<t t-if=\"state.{field}\">{}</t><t t-else=\"\">empty</t>",
            random_node(rng, depth)
        ),
        2 => format!("<Item {field}=\"state.{field}\"/>"),
        3 => format!("text {field} "),
        _ => random_node(rng, depth),
    }
}

// Print binary size information - can be used from individual benchmarks
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let metadata = std::fs::metadata(binary_path.clone()).unwrap();
    let size_bytes = metadata.len();
    let size_kb = size_bytes as f64 / 1024.0;

    println!("Binary size: {size_kb:.2} KB ({size_bytes} bytes)");
    println!("Binary path: {}", binary_path.display());
}
