use anyhow::Result;

use siteaudit::config::Config;
use siteaudit::review::registry::{facters_by_names, validators_by_names};
use siteaudit::review::DefinitionRegistry;

pub fn definitions(config: &Config) -> Result<()> {
    let facters = facters_by_names(&config.review.facters)?;
    let validators = validators_by_names(&config.review.validators)?;
    let registry = DefinitionRegistry::build(&facters, &validators)?;

    println!("Facts");
    println!("========================");
    for entry in registry.fact_definitions() {
        let definition = &entry.definition;
        println!(
            "  {:<28} {:<10} {:<12} {}",
            definition.key,
            entry.owner,
            definition.category,
            definition.title
        );
    }

    println!();
    println!("Violations");
    println!("========================");
    for entry in registry.violation_definitions() {
        let definition = &entry.definition;
        let override_config = config.review.settings.get(definition.key);
        let effective = override_config.or(definition.default_config.as_ref());
        println!(
            "  {:<28} {:<12} {:<12} {}",
            definition.key, entry.owner, definition.category, definition.title
        );
        if let Some(settings) = effective {
            println!("  {:<28} config: {settings}", "");
        }
    }

    Ok(())
}
