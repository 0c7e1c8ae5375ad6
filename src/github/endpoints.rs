// GitHub API endpoint addresses.
// Builds the provider URLs the aggregator fetches through the proxy pool.

/// Profile of a user.
pub fn user_url(api_base: &str, username: &str) -> String {
    format!("{}/users/{}", trim(api_base), username)
}

/// Public repositories of a user (first page only).
pub fn repos_url(api_base: &str, username: &str) -> String {
    format!("{}/users/{}/repos", trim(api_base), username)
}

/// Most recent commits of a repository.
pub fn commits_url(api_base: &str, owner: &str, repo: &str, per_page: u32) -> String {
    format!(
        "{}/repos/{}/{}/commits?per_page={}",
        trim(api_base),
        owner,
        repo,
        per_page
    )
}

fn trim(api_base: &str) -> &str {
    api_base.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let base = "https://api.github.com/";
        assert_eq!(user_url(base, "octocat"), "https://api.github.com/users/octocat");
        assert_eq!(
            repos_url(base, "octocat"),
            "https://api.github.com/users/octocat/repos"
        );
        assert_eq!(
            commits_url(base, "octocat", "hello-world", 10),
            "https://api.github.com/repos/octocat/hello-world/commits?per_page=10"
        );
    }
}
