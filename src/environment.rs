use std::env;
use std::str::FromStr;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped, so an unset variable yields an empty vector.
///
/// # Arguments
/// - `var`: The name of the environment variable.
/// - `delimiter`: The character to split the environment variable's value by.
///
/// # Returns
/// - `Vec<String>`
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reads and parses an environment variable, falling back to `default` when it is
/// unset or does not parse.
pub fn get_env_var_or<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as a string, treating empty values as unset.
pub fn get_env_var_opt(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_defaults() {
        env::set_var("FUNNELMAP_TEST_LANGS", "en; es ;;de");
        assert_eq!(
            get_env_var_as_vec("FUNNELMAP_TEST_LANGS", ';'),
            vec!["en", "es", "de"]
        );
        assert!(get_env_var_as_vec("FUNNELMAP_TEST_UNSET_VAR", ';').is_empty());

        env::set_var("FUNNELMAP_TEST_CEILING", "not-a-number");
        assert_eq!(get_env_var_or("FUNNELMAP_TEST_CEILING", 5usize), 5);
        env::set_var("FUNNELMAP_TEST_CEILING", " 7 ");
        assert_eq!(get_env_var_or("FUNNELMAP_TEST_CEILING", 5usize), 7);

        env::set_var("FUNNELMAP_TEST_EMPTY", "  ");
        assert_eq!(get_env_var_opt("FUNNELMAP_TEST_EMPTY"), None);
    }
}
