//! Resolve command - print the transfer plan for a value

use anyhow::{anyhow, bail, Result};
use gimarshal_runtime::fixture;
use gimarshal_runtime::transfer::{resolve_inout, resolve_transfer, Direction, TransferMode};

/// Run the resolve command
pub fn run(direction: &str, mode: &str, ty: &str, json: bool) -> Result<()> {
    let direction: Direction = direction.parse().map_err(|e: String| anyhow!(e))?;
    let mode: TransferMode = mode.parse().map_err(|e: String| anyhow!(e))?;
    let library = fixture::library()?;
    let ty = library.registry().descriptor(ty)?;
    if !mode.applies_to(&ty) {
        bail!("container transfer does not apply to leaf type {}", ty);
    }

    let plan = resolve_transfer(direction, mode, &ty);
    if json {
        let mut value = serde_json::json!({
            "direction": direction,
            "mode": mode,
            "type": ty.to_string(),
            "plan": plan,
        });
        if direction == Direction::InOut {
            value["inout"] = serde_json::to_value(resolve_inout(mode, &ty))?;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} {} {}", direction, mode, ty);
        println!("{}", plan);
        if direction == Direction::InOut {
            let both = resolve_inout(mode, &ty);
            println!();
            println!("old value:");
            println!("{}", both.release_old);
            println!("new value:");
            println!("{}", both.acquire_new);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_bad_direction() {
        let err = run("sideways", "none", "utf8", false).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_resolve_rejects_container_on_leaf() {
        let err = run("in", "container", "utf8", false).unwrap_err();
        assert!(err.to_string().contains("leaf"));
    }

    #[test]
    fn test_resolve_unknown_type() {
        assert!(run("in", "none", "NoSuchType", false).is_err());
    }

    #[test]
    fn test_resolve_plan() {
        assert!(run("out", "container", "list<utf8>", true).is_ok());
    }
}
