mod common;

use common::{road_batch, slim_cfg, slim_vgg, B};
use road_dataset::ImageShape;
use training::{adam, CheckpointStore, Trainer};

#[test]
fn restore_reproduces_loss_and_optimizer_state() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path().join("ckpts"));
    let device = Default::default();
    let batch = road_batch(2, ImageShape::new(32, 64));

    let cfg = slim_cfg();
    let mut trained = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg.clone(), false);
    for _ in 0..3 {
        trained.step(&batch, 1.0, 1e-3).unwrap();
    }
    let saved_path = store.save(&trained).unwrap();
    assert!(saved_path.is_file());
    assert!(store.optim_path().is_file());

    let index = store.latest().unwrap().expect("index written");
    assert_eq!(index.steps, 3);
    assert_eq!(index.config, cfg);

    let fresh = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg, false);
    assert_ne!(fresh.loss(&batch, 1.0), trained.loss(&batch, 1.0));
    let (mut restored, index) = store.restore(fresh, &device).unwrap();
    assert!(index.is_some());
    assert_eq!(restored.steps(), 3);
    assert_eq!(restored.loss(&batch, 1.0), trained.loss(&batch, 1.0));

    // Same moments, same next update.
    trained.step(&batch, 1.0, 1e-3).unwrap();
    restored.step(&batch, 1.0, 1e-3).unwrap();
    let (a, b) = (trained.loss(&batch, 1.0), restored.loss(&batch, 1.0));
    assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0), "{a} vs {b}");
}

#[test]
fn empty_store_leaves_trainer_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path());
    let device = Default::default();
    let cfg = slim_cfg();
    let trainer = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg, false);
    let batch = road_batch(1, ImageShape::new(32, 32));
    let before = trainer.loss(&batch, 1.0);

    assert!(store.latest().unwrap().is_none());
    let (trainer, index) = store.restore(trainer, &device).unwrap();
    assert!(index.is_none());
    assert_eq!(trainer.loss(&batch, 1.0), before);
}

#[test]
fn checkpoint_for_another_network_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path());
    let device = Default::default();

    let cfg = slim_cfg();
    let trainer = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg, false);
    store.save(&trainer).unwrap();

    let wider = models::Fcn8sConfig::new(slim_vgg().with_fc_channels(32));
    let other = Trainer::new(wider.init::<B>(&device), adam::<B>(), wider, false);
    let err = store.restore(other, &device).err().expect("mismatch must fail");
    assert!(err.to_string().contains("different network"), "{err}");
}

#[test]
fn corrupt_record_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path());
    let device = Default::default();
    let cfg = slim_cfg();
    let trainer = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg.clone(), false);
    store.save(&trainer).unwrap();
    std::fs::write(store.model_path(), b"not a record").unwrap();

    let again = Trainer::new(cfg.init::<B>(&device), adam::<B>(), cfg, false);
    assert!(store.restore(again, &device).is_err());
}
