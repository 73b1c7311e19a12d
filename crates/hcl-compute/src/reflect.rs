//! WGSL source reflection.
//!
//! Extracts what dispatch needs to know about a program without a full
//! shader front end: the compute entry points with their declared
//! work-group sizes, and the group-0 resource bindings with their address
//! spaces. Both backends build from the same reflection, so argument
//! validation behaves identically on software and wgpu devices.

use regex::Regex;

/// Address space of a resource binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    /// `var<uniform>`: bound from a scalar argument.
    Uniform,
    /// `var<storage>` / `var<storage, read>`: read-only buffer.
    Storage,
    /// `var<storage, read_write>`: writable buffer.
    StorageReadWrite,
}

impl AddressSpace {
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage | Self::StorageReadWrite)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Storage => "storage, read",
            Self::StorageReadWrite => "storage, read_write",
        }
    }
}

/// A `@group(0) @binding(n)` resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub binding: u32,
    pub name: String,
    pub space: AddressSpace,
}

/// A `@compute` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    /// Declared `@workgroup_size`, missing extents filled with 1.
    pub workgroup_size: [u32; 3],
}

impl EntryPointInfo {
    pub fn workgroup_items(&self) -> u32 {
        self.workgroup_size.iter().product()
    }
}

/// Reflected program interface.
#[derive(Debug, Clone, Default)]
pub struct ProgramReflection {
    pub entry_points: Vec<EntryPointInfo>,
    /// Sorted by binding index, contiguous from 0.
    pub bindings: Vec<BindingInfo>,
}

impl ProgramReflection {
    pub fn entry_point(&self, name: &str) -> Option<&EntryPointInfo> {
        self.entry_points.iter().find(|e| e.name == name)
    }

    /// Number of positional kernel arguments.
    pub fn arity(&self) -> u32 {
        self.bindings.len() as u32
    }
}

/// Reflect a WGSL source. Errors are build-log text.
pub fn reflect(source: &str) -> Result<ProgramReflection, String> {
    let source = strip_comments(source)?;
    let entry_points = reflect_entry_points(&source)?;
    let bindings = reflect_bindings(&source)?;

    if entry_points.is_empty() {
        return Err("error: no @compute entry point found".into());
    }

    Ok(ProgramReflection {
        entry_points,
        bindings,
    })
}

fn regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("internal error: reflection pattern: {e}"))
}

fn strip_comments(source: &str) -> Result<String, String> {
    let block = regex(r"(?s)/\*.*?\*/")?;
    let line = regex(r"//[^\n]*")?;
    let without_blocks = block.replace_all(source, " ");
    Ok(line.replace_all(&without_blocks, "").into_owned())
}

fn reflect_entry_points(source: &str) -> Result<Vec<EntryPointInfo>, String> {
    let function = regex(r"((?:@[A-Za-z_]\w*(?:\s*\([^)]*\))?\s*)+)fn\s+([A-Za-z_]\w*)")?;
    let workgroup = regex(r"@workgroup_size\s*\(([^)]*)\)")?;

    let mut entry_points = Vec::new();
    for caps in function.captures_iter(source) {
        let attributes = &caps[1];
        if !attributes.contains("@compute") {
            continue;
        }
        let name = caps[2].to_string();

        let Some(size) = workgroup.captures(attributes) else {
            return Err(format!("error: entry point '{name}' has no @workgroup_size"));
        };
        let workgroup_size = parse_workgroup_size(&name, &size[1])?;

        if entry_points.iter().any(|e: &EntryPointInfo| e.name == name) {
            return Err(format!("error: entry point '{name}' declared twice"));
        }
        entry_points.push(EntryPointInfo {
            name,
            workgroup_size,
        });
    }
    Ok(entry_points)
}

fn parse_workgroup_size(entry: &str, args: &str) -> Result<[u32; 3], String> {
    let extents: Vec<&str> = args.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if extents.is_empty() || extents.len() > 3 {
        return Err(format!("error: entry point '{entry}': @workgroup_size needs 1 to 3 extents"));
    }

    let mut size = [1u32; 3];
    for (slot, extent) in size.iter_mut().zip(&extents) {
        let digits = extent.trim_end_matches(['u', 'i']);
        *slot = match digits.parse::<u32>() {
            Ok(v) if v > 0 => v,
            _ => {
                return Err(format!(
                    "error: entry point '{entry}': @workgroup_size extent '{extent}' must be a positive integer literal"
                ));
            }
        };
    }
    Ok(size)
}

fn reflect_bindings(source: &str) -> Result<Vec<BindingInfo>, String> {
    let binding = regex(
        r"@group\s*\(\s*(\d+)\s*\)\s*@binding\s*\(\s*(\d+)\s*\)\s*var\s*(?:<([^>]*)>)?\s*([A-Za-z_]\w*)",
    )?;

    let mut bindings = Vec::new();
    for caps in binding.captures_iter(source) {
        let name = caps[4].to_string();
        let group: u32 = caps[1].parse().map_err(|_| format!("error: '{name}': bad group index"))?;
        if group != 0 {
            return Err(format!("error: '{name}': only @group(0) is supported, found @group({group})"));
        }
        let index: u32 = caps[2].parse().map_err(|_| format!("error: '{name}': bad binding index"))?;
        let space = parse_address_space(&name, caps.get(3).map(|m| m.as_str()))?;

        bindings.push(BindingInfo {
            binding: index,
            name,
            space,
        });
    }

    bindings.sort_by_key(|b| b.binding);
    for (expected, b) in bindings.iter().enumerate() {
        if b.binding != expected as u32 {
            return Err(format!(
                "error: '{}': bindings must be contiguous from 0, expected @binding({expected}) but found @binding({})",
                b.name, b.binding
            ));
        }
    }
    Ok(bindings)
}

fn parse_address_space(name: &str, template: Option<&str>) -> Result<AddressSpace, String> {
    let parts: Vec<String> = template
        .unwrap_or_default()
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    match parts.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["uniform"] => Ok(AddressSpace::Uniform),
        ["storage"] | ["storage", "read"] => Ok(AddressSpace::Storage),
        ["storage", "read_write"] => Ok(AddressSpace::StorageReadWrite),
        _ => Err(format!(
            "error: '{name}': unsupported resource '{}' (expected uniform or storage)",
            template.unwrap_or("<none>")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
// comment with @compute fn fake()
@group(0) @binding(1) var<uniform> params: vec4<u32>;
@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(2) var<storage> table: array<u32>;

/* @compute @workgroup_size(1) fn hidden() {} */

fn helper(x: f32) -> f32 { return x; }

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {}

@compute
@workgroup_size(64u)
fn second(@builtin(global_invocation_id) gid: vec3<u32>) {}
"#;

    #[test]
    fn test_entry_points() {
        let r = reflect(SOURCE).unwrap();
        assert_eq!(r.entry_points.len(), 2);
        assert_eq!(r.entry_points[0].name, "main");
        assert_eq!(r.entry_points[0].workgroup_size, [16, 16, 1]);
        assert_eq!(r.entry_points[1].workgroup_size, [64, 1, 1]);
        assert!(r.entry_point("helper").is_none());
        assert!(r.entry_point("hidden").is_none());
    }

    #[test]
    fn test_bindings() {
        let r = reflect(SOURCE).unwrap();
        assert_eq!(r.arity(), 3);
        assert_eq!(r.bindings[0].space, AddressSpace::StorageReadWrite);
        assert_eq!(r.bindings[1].space, AddressSpace::Uniform);
        assert_eq!(r.bindings[2].space, AddressSpace::Storage);
        assert_eq!(r.bindings[2].name, "table");
    }

    #[test]
    fn test_binding_gap() {
        let src = "@group(0) @binding(1) var<uniform> n: u32;\n@compute @workgroup_size(1) fn k() {}";
        assert!(reflect(src).unwrap_err().contains("contiguous"));
    }

    #[test]
    fn test_other_group() {
        let src = "@group(1) @binding(0) var<uniform> n: u32;\n@compute @workgroup_size(1) fn k() {}";
        assert!(reflect(src).unwrap_err().contains("@group(0)"));
    }

    #[test]
    fn test_no_entry_points() {
        assert!(reflect("fn helper() {}").is_err());
    }

    #[test]
    fn test_workgroup_size_must_be_literal() {
        let src = "@compute @workgroup_size(WG) fn k() {}";
        assert!(reflect(src).unwrap_err().contains("integer literal"));
    }
}
