use rand::{Rng, SeedableRng, rngs::StdRng};

/// Generate n random layout/page sources mixing text, branches and directives.
pub fn generate_random_templates(n: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut templates = Vec::with_capacity(n);

    for _ in 0..n {
        let mut source = String::from("<html><body>");
        let sections = rng.random_range(5..20);
        for _ in 0..sections {
            let field = random_string(&mut rng, 3, 8);
            let file = random_string(&mut rng, 4, 10);
            match rng.random_range(0..5) {
                0 => source.push_str(&format!("<p>{{{{.{}}}}}</p>", field)),
                1 => source.push_str(&format!("{{{{partial \"{}.html\" .{}}}}}", file, field)),
                2 => source.push_str(&format!(
                    "{{{{if .{}}}}}{{{{render \"{}\"}}}}{{{{else}}}}{{{{render}}}}{{{{end}}}}",
                    field, file
                )),
                3 => source.push_str(&format!(
                    "{{{{range $i, $e := .{}}}}}{{{{partial \"{}.html\" .}}}}{{{{end}}}}",
                    field, file
                )),
                _ => source.push_str(&format!(
                    "{{{{with .{}}}}}{{{{printf \"%s\" .Name}}}}{{{{end}}}}",
                    field
                )),
            }
        }
        source.push_str("</body></html>");
        templates.push(source);
    }

    templates
}

/// Generate a random string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let charset = "abcdefghijklmnopqrstuvwxyz";
    let len = rng.random_range(min_len..=max_len);

    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset.chars().nth(idx).unwrap()
        })
        .collect()
}

// Print binary size information - can be used from individual benchmarks
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let metadata = std::fs::metadata(binary_path.clone()).unwrap();
    let size_bytes = metadata.len();
    let size_kb = size_bytes as f64 / 1024.0;
    let size_mb = size_kb / 1024.0;

    println!(
        "Binary size: {:.2} MB ({:.2} KB, {} bytes)",
        size_mb, size_kb, size_bytes
    );
    println!("Binary path: {}", binary_path.display());
}
