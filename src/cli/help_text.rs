pub(super) const ROOT_LONG_ABOUT: &str = "\
Detect unauthorized modification of append-only borg repositories

Append-only mode stops backup clients from deleting or rewriting archives, but
anyone with direct access to the server's storage still can. borg-ledger runs
on the server that holds the repositories, keeps a trusted ledger of every
archive name and id, and compares it against the live repository on each run.

CORE CONCEPTS:

  Ledgers:
    For every repository directory directly below ROOT, a TOML file named
    .<repository>.ledger.toml is kept next to it in ROOT. It lists the archive
    names and ids that were accepted by the last forced run. The file is plain
    text so it can be audited without this tool.

  Classification:
    A  new archive (in the repository, not in the ledger): expected growth
    D  missing archive (in the ledger, gone from the repository): violation
    M  id mismatch (same name, different id): violation
    .  match (only shown with --all)
    !  repository-level problem: unreadable repository, missing or corrupt
       ledger, first sighting, or a baselined repository that disappeared

  Registry:
    ROOT/.borg-ledger-registry.toml records which repositories were baselined.
    It is how a deleted ledger is told apart from a repository that was never
    tracked.

  Verify and force:
    Without --force nothing is ever written, so inspecting a repository can
    never erase evidence of tampering. With --force every readable repository's
    ledger is replaced with its current archive list, even when violations were
    found. Repositories that cannot be read are never re-baselined.

TYPICAL WORKFLOW:

  1. Establish the baseline once:
     $ borg-ledger --force /srv/borg

  2. Verify regularly (cron, monitoring):
     $ borg-ledger /srv/borg || alert_admin

  3. After pruning or compacting as an operator, review and accept:
     $ borg-ledger /srv/borg
     $ borg-ledger --force --fingerprint <FINGERPRINT> /srv/borg

EXIT CODES:

  0    no violations (or a successful forced run)
  1    violations found
  2    a repository could not be read, the registry could not be read or
       written, a ledger could not be written, or the fingerprint did not
       match
  255  invalid arguments or unusable ROOT

ENVIRONMENT:

  The backup tool is run as `borg list --json <repository>` with this
  process's environment, so BORG_PASSPHRASE and similar variables apply.
  Standard input is closed; repositories that need an interactive passphrase
  are reported as unreadable.
";

pub(super) const FINGERPRINT_LONG_HELP: &str = "\
Only update ledgers if the differences found match this fingerprint.

A run that finds differences prints a fingerprint identifying all of them.
Passing it to the forced run guarantees that exactly the reviewed changes are
accepted. If anything changed in between, no ledger is written.";

pub(super) const FIRST_SIGHTING_LONG_HELP: &str = "\
How to treat a repository that has no ledger and was never baselined.

fail:  report it as a violation until a forced run creates its ledger.
allow: accept it; its archives are reported as new.

A repository that was baselined before and lost its ledger is always a
violation, whatever this is set to.";
