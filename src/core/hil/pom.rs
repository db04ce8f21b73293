use regex::Regex;

use super::HilError;

/// Placeholder version written into the pom until the user picks a real one.
pub const VERSION_SENTINEL: &str = "*****";

/// Set the `<version>` of the dependency declared with `artifact_id`.
///
/// Falls back to the first `<version>{current}</version>` in the file when no
/// dependency block names the artifact.
pub fn replace_dependency_version(
    pom: &str,
    artifact_id: &str,
    current: &str,
    new_version: &str,
) -> Result<String, HilError> {
    let block = Regex::new(r"(?s)<dependency>.*?</dependency>")
        .map_err(|e| HilError::PomRewrite(e.to_string()))?;
    let version = Regex::new(r"(?s)<version>.*?</version>")
        .map_err(|e| HilError::PomRewrite(e.to_string()))?;
    let wanted = format!("<artifactId>{}</artifactId>", artifact_id);
    let replacement = format!("<version>{}</version>", new_version);

    for m in block.find_iter(pom) {
        let text = m.as_str();
        if !text.contains(&wanted) {
            continue;
        }
        let rewritten = if version.is_match(text) {
            version.replacen(text, 1, regex::NoExpand(&replacement)).to_string()
        } else {
            text.replacen(&wanted, &format!("{}\n      {}", wanted, replacement), 1)
        };
        let mut out = String::with_capacity(pom.len() + new_version.len());
        out.push_str(&pom[..m.start()]);
        out.push_str(&rewritten);
        out.push_str(&pom[m.end()..]);
        return Ok(out);
    }

    let exact = format!("<version>{}</version>", current);
    if !current.is_empty() && pom.contains(&exact) {
        return Ok(pom.replacen(&exact, &replacement, 1));
    }
    Err(HilError::PomRewrite(format!(
        "no version of {} found in pom",
        artifact_id
    )))
}
