//! Describe command - print descriptors of the fixture library

use anyhow::{bail, Result};
use colored::*;
use gimarshal_runtime::fixture;
use gimarshal_runtime::registry::Library;

/// Run the describe command
pub fn run(name: Option<&str>) -> Result<()> {
    let library = fixture::library()?;
    print!("{}", render(&library, name)?);
    Ok(())
}

/// Text for one type or function, or the full listing
pub fn render(library: &Library, name: Option<&str>) -> Result<String> {
    let Some(name) = name else {
        return Ok(listing(library));
    };
    if let Some(ty) = library.registry().lookup(name) {
        return Ok(ty.to_string());
    }
    if let Some(function) = library.function(name) {
        return Ok(format!("function {}\n", function.info));
    }
    bail!("no type or function named '{}'", name)
}

fn listing(library: &Library) -> String {
    let registry = library.registry();
    let mut out = format!("{}\n", "Types:".bold());
    for name in registry.names() {
        let kind = registry.lookup(name).map_or("?", |ty| ty.kind());
        out.push_str(&format!("  {:<14} {}\n", kind, name));
    }
    let functions: Vec<&str> = library.function_names().collect();
    out.push_str(&format!("\n{} ({})\n", "Functions:".bold(), functions.len()));
    for name in functions {
        out.push_str(&format!("  {}\n", name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_type() {
        let library = fixture::library().unwrap();
        let text = render(&library, Some("SubSubObject")).unwrap();
        assert!(text.starts_with("object SubSubObject : SubObject"));
    }

    #[test]
    fn test_describe_lists_properties() {
        let library = fixture::library().unwrap();
        let text = render(&library, Some("PropertiesObject")).unwrap();
        assert!(text.contains("  property some_boolean: boolean\n"));
        assert!(text.contains("  property some_gtype: gtype\n"));
    }

    #[test]
    fn test_describe_function() {
        let library = fixture::library().unwrap();
        let text = render(&library, Some("gerror")).unwrap();
        assert!(text.contains("throws"));
    }

    #[test]
    fn test_describe_unknown() {
        let library = fixture::library().unwrap();
        assert!(render(&library, Some("Missing")).is_err());
    }

    #[test]
    fn test_listing_names_everything() {
        let library = fixture::library().unwrap();
        let text = render(&library, None).unwrap();
        assert!(text.contains("BoxedStruct"));
        assert!(text.contains("array_in_sum"));
    }
}
