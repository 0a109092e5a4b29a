//! Exercises the store and the reconciler end to end against real files, using [LocalShell] in
//! place of an SSH session. Everything the store sends goes through `sh -c`, exactly as it would
//! on a remote host.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vhostctl::core::{DesiredArtifact, Kind, Presence, RenderParams};
use vhostctl::reconcile::report::{title, Report};
use vhostctl::reconcile::state::StateFile;
use vhostctl::reconcile::{Change, Diagnostic, Reconciler};
use vhostctl::remote::LocalShell;
use vhostctl::store::{RemoteArtifactStore, StoreOptions};
use vhostctl::Error;

fn store() -> RemoteArtifactStore<LocalShell> {
    RemoteArtifactStore::new(Arc::new(LocalShell::new()), StoreOptions::default())
}

fn path_in(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn site(identity: &str, path: &str, server_name: &str) -> DesiredArtifact {
    DesiredArtifact::new(
        Kind::Site,
        identity,
        Some(path.to_string()),
        RenderParams {
            server_name: server_name.into(),
            listen_port: 8080,
            document_root: "/var/www/blog".into(),
        },
    )
    .unwrap()
}

/// Records every report as one line, prefixed with its outcome.
#[derive(Default)]
struct Lines(Vec<String>);

impl Report for Lines {
    fn starting(&mut self, _: &str, _: &Change) -> io::Result<()> {
        Ok(())
    }

    fn report(&mut self, _: &str, change: &Change, outcome: Result<(), &Diagnostic>) -> io::Result<()> {
        let status = if outcome.is_ok() { "ok" } else { "failed" };
        self.0.push(format!("{status} {}", title(change)));
        Ok(())
    }

    fn diagnostic(&mut self, _: &str, identity: &str, diagnostic: &Diagnostic) -> io::Result<()> {
        self.0.push(format!("{identity}: {diagnostic}"));
        Ok(())
    }
}

mod store {
    use super::*;

    #[tokio::test]
    async fn blog_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "blog.conf");
        let store = store();
        let blog = site("blog", &path, "blog.example.com");

        let created = store.create(&blog).await.unwrap();
        assert_eq!(Presence::Present, created.presence());
        assert_eq!(blog.content(), fs::read_to_string(&path).unwrap());

        let read = store.read("blog", &path).await.unwrap();
        assert_eq!(Some(blog.content()), read.content.as_deref());

        let renamed = site("blog", &path, "www.blog.example.com");
        store.update(&renamed, &read).await.unwrap();
        assert_eq!(renamed.content(), fs::read_to_string(&path).unwrap());

        store.delete("blog", &path).await.unwrap();
        assert!(!Path::new(&path).exists());
        assert_eq!(Presence::Absent, store.read("blog", &path).await.unwrap().presence());
        assert_eq!(Presence::Absent, store.belief("blog"));
    }

    #[tokio::test]
    async fn never_created_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let observed = store().read("ghost", &path_in(&dir, "ghost.conf")).await.unwrap();
        assert_eq!(Presence::Absent, observed.presence());
        assert_eq!(None, observed.content);
    }

    #[tokio::test]
    async fn deleting_twice_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "blog.conf");
        let store = store();
        store.create(&site("blog", &path, "blog.example.com")).await.unwrap();

        store.delete("blog", &path).await.unwrap();
        store.delete("blog", &path).await.unwrap();
        assert!(!Path::new(&path).exists());
    }

    #[tokio::test]
    async fn shell_metacharacters_are_written_literally() {
        let dir = TempDir::new().unwrap();
        let canary = path_in(&dir, "canary");
        let path = path_in(&dir, "it's $(here) `too`.conf");
        let hostile = format!("x; touch {canary}; $(touch {canary}) `touch {canary}` 'q\" \\");

        let blog = site("blog", &path, &hostile);
        store().create(&blog).await.unwrap();

        assert!(!Path::new(&canary).exists(), "a metacharacter was interpreted");
        assert_eq!(blog.content(), fs::read_to_string(&path).unwrap());
        assert!(blog.content().contains(&hostile));
    }

    #[tokio::test]
    async fn moving_removes_the_old_file() {
        let dir = TempDir::new().unwrap();
        let (old, new) = (path_in(&dir, "old.conf"), path_in(&dir, "new.conf"));
        let store = store();
        let observed = store.create(&site("blog", &old, "blog.example.com")).await.unwrap();

        let moved = site("blog", &new, "blog.example.com");
        let result = store.update(&moved, &observed).await.unwrap();

        assert_eq!(new, result.path);
        assert!(!Path::new(&old).exists());
        assert_eq!(moved.content(), fs::read_to_string(&new).unwrap());
    }

    #[tokio::test]
    async fn leaves_no_temporary_files_behind() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "blog.conf");
        store().create(&site("blog", &path, "blog.example.com")).await.unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(vec!["blog.conf".to_string()], names);
    }

    #[tokio::test]
    async fn reading_a_directory_is_unknown() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "sub");
        fs::create_dir(&path).unwrap();

        let store = store();
        let e = store.read("blog", &path).await.unwrap_err();

        assert!(matches!(e, Error::RemoteCommand { exit_code: Some(3), .. }), "{e:?}");
        assert_eq!(Some(Presence::Unknown), e.presence());
        assert_eq!(Presence::Unknown, store.belief("blog"));
    }

    #[tokio::test]
    async fn creating_over_a_directory_fails_and_leaves_it_untouched() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "sites");
        fs::create_dir(&path).unwrap();
        let store = store();

        let e = store.create(&site("blog", &path, "blog.example.com")).await.unwrap_err();

        assert!(matches!(e, Error::RemoteCommand { exit_code: Some(3), .. }), "{e:?}");
        assert_eq!(Presence::Unknown, store.belief("blog"));
        assert_eq!(0, fs::read_dir(&path).unwrap().count());
        assert_eq!(1, fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test]
    async fn moving_onto_a_directory_keeps_the_old_file() {
        let dir = TempDir::new().unwrap();
        let (old, new) = (path_in(&dir, "old.conf"), path_in(&dir, "new"));
        fs::create_dir(&new).unwrap();
        let store = store();
        let observed = store.create(&site("blog", &old, "blog.example.com")).await.unwrap();

        let e = store
            .update(&site("blog", &new, "blog.example.com"), &observed)
            .await
            .unwrap_err();

        assert!(matches!(e, Error::RemoteCommand { exit_code: Some(3), .. }), "{e:?}");
        assert!(Path::new(&old).is_file());
        assert_eq!(0, fs::read_dir(&new).unwrap().count());
    }

    #[tokio::test]
    async fn missing_ancestors_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "no/such/dirs/blog.conf");

        let observed = store().read("blog", &path).await.unwrap();

        assert_eq!(Presence::Absent, observed.presence());
    }

    #[tokio::test]
    async fn a_file_in_place_of_a_directory_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plain"), "not a directory").unwrap();

        let observed = store().read("blog", &path_in(&dir, "plain/blog.conf")).await.unwrap();

        assert_eq!(Presence::Absent, observed.presence());
    }

    #[tokio::test]
    async fn writing_into_a_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "missing/blog.conf");
        let store = store();

        let e = store.create(&site("blog", &path, "blog.example.com")).await.unwrap_err();

        assert!(matches!(e, Error::RemoteCommand { .. }), "{e:?}");
        assert_eq!(Presence::Unknown, store.belief("blog"));
    }
}

mod reconcile {
    use super::*;

    #[tokio::test]
    async fn apply_converges_and_then_plans_nothing() {
        let dir = TempDir::new().unwrap();
        let mut state = StateFile::load(dir.path().join("state.yaml")).unwrap();
        let reconciler = Reconciler::new(store());
        let desired = vec![
            site("blog", &path_in(&dir, "blog.conf"), "blog.example.com"),
            site("shop", &path_in(&dir, "shop.conf"), "shop.example.com"),
        ];

        let plan = reconciler.plan(desired.clone(), &state).await;
        let mut lines = Lines::default();
        let summary = reconciler.apply(plan, &mut state, &mut lines).await;

        assert!(summary.is_success(), "{lines:?}", lines = lines.0);
        assert_eq!(2, summary.created);

        let reloaded = StateFile::load(dir.path().join("state.yaml")).unwrap();
        assert_eq!(state.records, reloaded.records);

        let plan = reconciler.plan(desired, &reloaded).await;
        assert!(plan.is_empty(), "{plan:?}");
        assert!(plan.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn out_of_band_edits_are_reverted() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "blog.conf");
        let mut state = StateFile::load(dir.path().join("state.yaml")).unwrap();
        let reconciler = Reconciler::new(store());
        let desired = vec![site("blog", &path, "blog.example.com")];

        let plan = reconciler.plan(desired.clone(), &state).await;
        reconciler.apply(plan, &mut state, &mut Lines::default()).await;
        fs::write(&path, "edited by hand\n").unwrap();

        let plan = reconciler.plan(desired.clone(), &state).await;
        assert!(matches!(plan.changes[..], [Change::Update { .. }]), "{plan:?}");

        let summary = reconciler.apply(plan, &mut state, &mut Lines::default()).await;
        assert_eq!(1, summary.updated);
        assert_eq!(desired[0].content(), fs::read_to_string(&path).unwrap());
    }

    #[tokio::test]
    async fn undeclared_artifacts_are_deleted() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "blog.conf");
        let mut state = StateFile::load(dir.path().join("state.yaml")).unwrap();
        let reconciler = Reconciler::new(store());

        let plan = reconciler
            .plan(vec![site("blog", &path, "blog.example.com")], &state)
            .await;
        reconciler.apply(plan, &mut state, &mut Lines::default()).await;

        let plan = reconciler.plan(Vec::new(), &state).await;
        let mut lines = Lines::default();
        let summary = reconciler.apply(plan, &mut state, &mut lines).await;

        assert_eq!(1, summary.deleted);
        assert_eq!(vec![format!("ok delete blog ({path})")], lines.0);
        assert!(!Path::new(&path).exists());
        assert!(state.records.is_empty());
    }

    #[tokio::test]
    async fn import_adopts_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir, "legacy.conf");
        fs::write(&path, "server {}\n").unwrap();

        let record = Reconciler::new(store())
            .import(Kind::Site, &format!("legacy:{path}"))
            .await
            .unwrap();

        assert_eq!("legacy", record.identity);
        assert_eq!(path, record.destination_path);
        assert_eq!(Some("server {}\n"), record.rendered_content.as_deref());
        assert_eq!(Presence::Present, record.last_known_presence);
    }

    #[tokio::test]
    async fn import_of_a_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let id = format!("legacy:{}", path_in(&dir, "legacy.conf"));

        let diagnostic = Reconciler::new(store()).import(Kind::Site, &id).await.unwrap_err();
        assert_eq!("File Not Found", diagnostic.summary);
    }
}
