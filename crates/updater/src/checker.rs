use crate::{
    error::{Result, UpdaterError},
    fetcher::ManifestFetcher,
    manifest::{self, PackageDescriptor},
    version,
};
use url::Url;

/// Identity of the package the running application was installed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Package name, compared against the manifest's bundle name.
    pub name: String,
    /// Installed version, dotted numeric.
    pub version: String,
    /// Full package identifier, used when asking for removal.
    pub full_name: String,
}

/// A successfully read manifest plus the verdict on whether to deploy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    descriptor: PackageDescriptor,
    should_update: bool,
}

impl UpdateInfo {
    pub(crate) fn new(descriptor: PackageDescriptor, should_update: bool) -> Self {
        Self {
            descriptor,
            should_update,
        }
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    /// Whether an update or install request should be sent for this package.
    pub fn should_update(&self) -> bool {
        self.should_update
    }
}

/// Result of checking for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAvailability {
    /// The manifest was read and validated.
    Checked(UpdateInfo),
    /// The check failed; nothing about the remote package is known.
    Failed(UpdaterError),
}

impl UpdateAvailability {
    pub fn succeeded(&self) -> bool {
        matches!(self, UpdateAvailability::Checked(_))
    }

    /// `false` for failed checks.
    pub fn should_update(&self) -> bool {
        self.info().is_some_and(UpdateInfo::should_update)
    }

    pub fn info(&self) -> Option<&UpdateInfo> {
        match self {
            UpdateAvailability::Checked(info) => Some(info),
            UpdateAvailability::Failed(_) => None,
        }
    }

    pub fn descriptor(&self) -> Option<&PackageDescriptor> {
        self.info().map(UpdateInfo::descriptor)
    }

    pub fn error(&self) -> Option<&UpdaterError> {
        match self {
            UpdateAvailability::Checked(_) => None,
            UpdateAvailability::Failed(err) => Some(err),
        }
    }

    /// Human-readable reason for a failed check.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    pub fn into_result(self) -> Result<UpdateInfo> {
        match self {
            UpdateAvailability::Checked(info) => Ok(info),
            UpdateAvailability::Failed(err) => Err(err),
        }
    }
}

impl From<Result<UpdateInfo>> for UpdateAvailability {
    fn from(result: Result<UpdateInfo>) -> Self {
        match result {
            Ok(info) => UpdateAvailability::Checked(info),
            Err(err) => UpdateAvailability::Failed(err),
        }
    }
}

/// Reads remote manifests and decides whether they describe an update.
pub struct UpdateChecker<F> {
    fetcher: F,
}

impl<F> UpdateChecker<F>
where
    F: ManifestFetcher,
{
    /// Create a new checker with the given fetcher.
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Download and parse the manifest at `manifest_url`.
    pub async fn fetch_descriptor(&self, manifest_url: &Url) -> Result<PackageDescriptor> {
        let response = self.fetcher.fetch(manifest_url).await?;
        if !response.status.is_success() {
            return Err(UpdaterError::FetchFailed(response.status.to_string()));
        }

        manifest::parse(&response.body).map_err(|err| {
            tracing::warn!(%manifest_url, error = %err, "manifest rejected");
            UpdaterError::from(err)
        })
    }

    /// Check whether the manifest at `manifest_url` offers a newer build of the
    /// installed package.
    ///
    /// Identity is checked before versions, so a manifest for another package
    /// never reads as "already up to date".
    pub async fn check_for_updates(
        &self,
        manifest_url: &Url,
        current_package_name: &str,
        current_version: &str,
    ) -> UpdateAvailability {
        let availability: UpdateAvailability = self
            .evaluate(manifest_url, current_package_name, current_version)
            .await
            .into();

        match &availability {
            UpdateAvailability::Checked(info) => tracing::info!(
                %manifest_url,
                available = info.descriptor().version(),
                current = current_version,
                should_update = info.should_update(),
                "update check completed"
            ),
            UpdateAvailability::Failed(err) => {
                tracing::warn!(%manifest_url, error = %err, "update check failed")
            }
        }
        availability
    }

    /// Convenience wrapper taking the installed package identity.
    pub async fn check(&self, manifest_url: &Url, installed: &InstalledPackage) -> UpdateAvailability {
        self.check_for_updates(manifest_url, &installed.name, &installed.version)
            .await
    }

    /// Read a manifest without identity or version checks, e.g. to install a
    /// different package. The result always permits deployment.
    pub async fn package_info(&self, manifest_url: &Url) -> UpdateAvailability {
        self.fetch_descriptor(manifest_url)
            .await
            .map(|descriptor| UpdateInfo::new(descriptor, true))
            .into()
    }

    async fn evaluate(
        &self,
        manifest_url: &Url,
        current_package_name: &str,
        current_version: &str,
    ) -> Result<UpdateInfo> {
        let descriptor = self.fetch_descriptor(manifest_url).await?;

        if descriptor.name() != current_package_name {
            return Err(UpdaterError::IdentityMismatch {
                expected: current_package_name.to_string(),
                found: descriptor.name().to_string(),
            });
        }

        let should_update = version::is_newer(current_version, descriptor.version())?;
        Ok(UpdateInfo::new(descriptor, should_update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockFetcher {
        entries: HashMap<String, (StatusCode, Vec<u8>)>,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                entries: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn insert(&mut self, url: &str, status: StatusCode, body: &str) {
            self.entries
                .insert(url.to_string(), (status, body.as_bytes().to_vec()));
        }
    }

    #[async_trait]
    impl ManifestFetcher for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entries
                .get(url.as_str())
                .map(|(status, body)| FetchResponse {
                    status: *status,
                    body: Bytes::from(body.clone()),
                })
                .ok_or_else(|| UpdaterError::FetchFailed("connection refused".into()))
        }
    }

    const MANIFEST_URL: &str = "https://updates.example.com/App.appinstaller";

    fn manifest(name: &str, version: &str) -> String {
        format!(
            r#"<AppInstaller Uri="{MANIFEST_URL}" Version="1.0.0.0">
                 <MainBundle Name="{name}" Version="{version}" Uri="https://updates.example.com/{name}.msixbundle"/>
               </AppInstaller>"#
        )
    }

    fn checker_with(status: StatusCode, body: &str) -> UpdateChecker<MockFetcher> {
        let mut fetcher = MockFetcher::new();
        fetcher.insert(MANIFEST_URL, status, body);
        UpdateChecker::new(fetcher)
    }

    fn url() -> Url {
        Url::parse(MANIFEST_URL).unwrap()
    }

    #[tokio::test]
    async fn newer_manifest_should_update() {
        let checker = checker_with(StatusCode::OK, &manifest("App", "1.2.0.1"));
        let availability = checker.check_for_updates(&url(), "App", "1.2.0.0").await;

        assert!(availability.succeeded());
        assert!(availability.should_update());
        assert_eq!(availability.error_message(), None);
        let descriptor = availability.descriptor().unwrap();
        assert_eq!(descriptor.version(), "1.2.0.1");
        assert_eq!(
            descriptor.download_url().as_str(),
            "https://updates.example.com/App.msixbundle"
        );
    }

    #[tokio::test]
    async fn equal_version_is_not_an_update() {
        let checker = checker_with(StatusCode::OK, &manifest("App", "1.2.3.4"));
        let availability = checker.check_for_updates(&url(), "App", "1.2.3.4").await;
        assert!(availability.succeeded());
        assert!(!availability.should_update());
    }

    #[tokio::test]
    async fn different_package_is_rejected_even_if_newer() {
        let checker = checker_with(StatusCode::OK, &manifest("OtherApp", "9.0.0.0"));
        let availability = checker.check_for_updates(&url(), "App", "1.0.0.0").await;

        assert!(!availability.succeeded());
        assert!(!availability.should_update());
        assert!(availability.descriptor().is_none());
        assert!(matches!(
            availability.error(),
            Some(UpdaterError::IdentityMismatch { found, .. }) if found == "OtherApp"
        ));
        assert_eq!(
            availability.error_message().as_deref(),
            Some("update is for a different package")
        );
    }

    #[tokio::test]
    async fn http_error_status_is_fetch_failure() {
        let checker = checker_with(StatusCode::NOT_FOUND, "gone");
        let availability = checker.check_for_updates(&url(), "App", "1.0.0.0").await;
        assert_eq!(
            availability.error_message().as_deref(),
            Some("fetch failed: 404 Not Found")
        );
    }

    #[tokio::test]
    async fn transport_error_is_fetch_failure() {
        let checker = UpdateChecker::new(MockFetcher::new());
        let availability = checker.check_for_updates(&url(), "App", "1.0.0.0").await;
        assert!(matches!(availability, UpdateAvailability::Failed(UpdaterError::FetchFailed(_))));
    }

    #[tokio::test]
    async fn unparsable_manifest_is_invalid() {
        let checker = checker_with(StatusCode::OK, "<html><body>oops");
        let availability = checker.check_for_updates(&url(), "App", "1.0.0.0").await;
        assert_eq!(availability.error_message().as_deref(), Some("invalid manifest"));
    }

    #[tokio::test]
    async fn malformed_versions_are_invalid_manifest() {
        let checker = checker_with(StatusCode::OK, &manifest("App", "1.x.0.0"));
        let availability = checker.check_for_updates(&url(), "App", "1.0.0.0").await;
        assert!(matches!(
            availability.error(),
            Some(UpdaterError::ManifestInvalid(_))
        ));

        let checker = checker_with(StatusCode::OK, &manifest("App", "1.0.0.1"));
        let availability = checker.check_for_updates(&url(), "App", "not-a-version").await;
        assert_eq!(availability.error_message().as_deref(), Some("invalid manifest"));
    }

    #[tokio::test]
    async fn every_check_refetches() {
        let checker = checker_with(StatusCode::OK, &manifest("App", "1.0.0.1"));
        let installed = InstalledPackage {
            name: "App".into(),
            version: "1.0.0.0".into(),
            full_name: "App_1.0.0.0_x64__abc".into(),
        };
        checker.check(&url(), &installed).await;
        checker.check(&url(), &installed).await;
        assert_eq!(checker.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn package_info_skips_identity_and_version_gates() {
        let checker = checker_with(StatusCode::OK, &manifest("OtherApp", "0.0.0.1"));
        let availability = checker.package_info(&url()).await;
        assert!(availability.succeeded());
        assert!(availability.should_update());
        assert_eq!(availability.descriptor().unwrap().name(), "OtherApp");
    }
}
