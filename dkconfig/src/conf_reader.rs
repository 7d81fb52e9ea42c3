use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::anyhow;
use java_properties::read;
use log::*;

use commons_error::*;

/// Read the configuration file from a direct path.
/// The `${name}` references found in the values are replaced with the value of the property `name`.
pub fn read_config_from_path(property_file: &Path) -> anyhow::Result<HashMap<String, String>> {
    log_debug!("Read the properties from the file, property_file=[{:?}]", property_file);

    let f = File::open(property_file)
        .map_err(err_fwd!("Cannot open the property file, property_file=[{:?}]", property_file))?;

    let props = read(BufReader::new(f))
        .map_err(err_fwd!("Cannot read the property file, property_file=[{:?}]", property_file))?;

    if props.is_empty() {
        return Err(anyhow!("The property file is empty, property_file=[{:?}]", property_file));
    }

    Ok(resolve_properties(props))
}

/// Loop over all the properties and replace the references in each of them
pub fn resolve_properties(props: HashMap<String, String>) -> HashMap<String, String> {
    let constants = props.clone();
    props
        .into_iter()
        .map(|(key, value)| (key, replace_value_with_constants(&value, &constants)))
        .collect()
}

/// Replaces a single property's value by substituting constants.
/// Placeholder format: ${KEY}. An unknown reference is left as is.
fn replace_value_with_constants(value: &str, constants: &HashMap<String, String>) -> String {
    let mut resolved_value = value.to_string();
    for (const_key, const_value) in constants {
        let placeholder = format!("${{{}}}", const_key);
        if resolved_value.contains(&placeholder) {
            resolved_value = resolved_value.replace(&placeholder, const_value);
        }
    }
    resolved_value
}
